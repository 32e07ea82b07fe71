// SPDX-License-Identifier: MIT OR Apache-2.0

//! SHA-1 digests over TPM parameter bytes
//!
//! The two wrapped-command digests here are shared by the transport
//! envelope's authorization and by the audit log chain:
//!
//! - `H1 = SHA1(innerOrdinal || innerParams)` over a wrapped request, with
//!   the key handle and authorization trailers left out
//! - `H2 = SHA1(innerRc || innerOrdinal || innerOutParams)` over a wrapped
//!   response, with the authorization trailers left out

use sha1::{Digest as _, Sha1};

use crate::codec::Digest;
use crate::error::FrameError;
use crate::frame::{decode_request, decode_response, Tag};

/// SHA-1 over the concatenation of `parts`
pub fn sha1(parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Parameter bytes of a wrapped request (H1 input after the ordinal)
///
/// Only handles the handle layouts transport sessions are used with: no
/// key handles for plain and Auth1 commands, one key handle for Auth2.
pub fn wrapped_command_params(inner_cmd: &[u8]) -> Result<(u32, &[u8]), FrameError> {
    let view = decode_request(inner_cmd)?;
    let params = match view.tag() {
        Tag::RquAuth2Command => {
            if view.body.len() < 4 {
                return Err(FrameError::Truncated {
                    offset: view.trailer_offset(),
                    needed: 4,
                    available: view.body.len(),
                });
            }
            &view.body[4..]
        }
        _ => view.body,
    };
    Ok((view.code(), params))
}

/// H1 of a wrapped request
pub fn wrapped_command_digest(inner_cmd: &[u8]) -> Result<Digest, FrameError> {
    let (ordinal, params) = wrapped_command_params(inner_cmd)?;
    Ok(sha1(&[&ordinal.to_be_bytes(), params]))
}

/// H2 of a wrapped response, given the ordinal of the request it answers
pub fn unwrapped_output_digest(inner_ordinal: u32, inner_rsp: &[u8]) -> Result<Digest, FrameError> {
    let view = decode_response(inner_rsp)?;
    Ok(sha1(&[
        &view.code().to_be_bytes(),
        &inner_ordinal.to_be_bytes(),
        view.body,
    ]))
}
