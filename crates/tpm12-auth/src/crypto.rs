// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crypto primitives used by the authorization protocol
//!
//! HMAC-SHA1 for inAuth/resAuth, random nonces, and the XOR masking the
//! TPM uses to carry new auth values under an OSAP shared secret.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use tpm12_verify::digest::sha1;
use tpm12_verify::{Digest, Nonce, Secret, DIGEST_SIZE};

use crate::error::{Result, TpmError};

type HmacSha1 = Hmac<Sha1>;

/// Auth value the TPM uses when none was set
pub const WELL_KNOWN_SECRET: Secret = [0u8; DIGEST_SIZE];

/// HMAC-SHA1 keyed with `key` over the concatenation of `parts`
pub fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> Result<Digest> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key)
        .map_err(|_| TpmError::IllegalArgument("invalid HMAC key length"))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Fresh 20-byte nonce from the thread-local CSPRNG
pub fn random_nonce() -> Nonce {
    let mut nonce = [0u8; DIGEST_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// `plaintext XOR SHA1(shared_secret || nonce)`
///
/// Masking is its own inverse, so the same call unmasks.
pub fn mask_secret(shared_secret: &Secret, nonce: &Nonce, plaintext: &Secret) -> Secret {
    let pad = sha1(&[shared_secret, nonce]);
    let mut out = [0u8; DIGEST_SIZE];
    for (o, (p, k)) in out.iter_mut().zip(plaintext.iter().zip(pad.iter())) {
        *o = p ^ k;
    }
    out
}

/// Usage auth derived from a password, as TPM tools conventionally do
pub fn auth_from_password(password: &[u8]) -> Secret {
    sha1(&[password])
}
