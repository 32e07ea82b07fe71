// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command model
//!
//! A command is a [`CommandHeader`] (kind, ordinal, no-auth flag) plus a
//! set of capability traits:
//!
//! - [`FramesAsBytes`]: body serialization and frame/size bookkeeping
//! - [`SuppliesAuthDigestFields`]: the fields covered by the input
//!   parameter digest (by default the whole body)
//! - [`EncryptsSecretsGivenSession`]: a hook run after nonce rotation that
//!   masks plaintext secrets under the session's shared secret
//!
//! [`TpmCommand`] ties these to an output type. Sessions dispatch on
//! [`CommandKind`].

use tracing::debug;

use tpm12_verify::codec::{read_bytes, ByteWriter};
use tpm12_verify::digest::sha1;
use tpm12_verify::frame::{
    self, compute_total_size, FrameView, Tag, BODY_OFFSET, HEADER_SIZE,
};
use tpm12_verify::result_code::TPM_SUCCESS;
use tpm12_verify::{Digest, FrameError};

use crate::error::{Result, TpmError};
use crate::session::AuthSession;
use crate::{ordinal_name, Tpm};

/// Number of authorization sessions a command is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Plain,
    Auth1,
    Auth2,
}

impl CommandKind {
    pub fn trailer_count(self) -> usize {
        match self {
            CommandKind::Plain => 0,
            CommandKind::Auth1 => 1,
            CommandKind::Auth2 => 2,
        }
    }

    pub fn request_tag(self) -> Tag {
        match self {
            CommandKind::Plain => Tag::RquCommand,
            CommandKind::Auth1 => Tag::RquAuth1Command,
            CommandKind::Auth2 => Tag::RquAuth2Command,
        }
    }
}

/// Kind, ordinal and no-auth state of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    kind: CommandKind,
    ordinal: u32,
    no_auth: bool,
}

impl CommandHeader {
    pub fn new(kind: CommandKind, ordinal: u32) -> Self {
        Self {
            kind,
            ordinal,
            no_auth: false,
        }
    }

    /// Kind the command was built as
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn is_no_auth(&self) -> bool {
        self.no_auth
    }

    /// Kind the command will be sent as
    pub fn effective_kind(&self) -> CommandKind {
        if self.no_auth {
            CommandKind::Plain
        } else {
            self.kind
        }
    }

    /// Drop the authorization trailer of a single-session command
    ///
    /// One-way: a second switch is rejected, as is switching a plain or
    /// two-session command.
    pub fn switch_to_no_auth(&mut self) -> Result<()> {
        match self.kind {
            CommandKind::Auth2 => Err(TpmError::UnsupportedOperation(
                "two-session commands cannot run without authorization",
            )),
            CommandKind::Plain => Err(TpmError::IllegalArgument(
                "command carries no authorization",
            )),
            CommandKind::Auth1 if self.no_auth => Err(TpmError::IllegalArgument(
                "command already switched to no-auth",
            )),
            CommandKind::Auth1 => {
                self.no_auth = true;
                Ok(())
            }
        }
    }
}

/// Body serialization and frame layout
pub trait FramesAsBytes {
    fn header(&self) -> &CommandHeader;

    fn header_mut(&mut self) -> &mut CommandHeader;

    /// Command-specific body, handles included
    fn write_body(&self, writer: ByteWriter) -> ByteWriter;

    fn ordinal(&self) -> u32 {
        self.header().ordinal()
    }

    fn kind(&self) -> CommandKind {
        self.header().effective_kind()
    }

    fn is_no_auth(&self) -> bool {
        self.header().is_no_auth()
    }

    fn switch_to_no_auth(&mut self) -> Result<()> {
        self.header_mut().switch_to_no_auth()
    }

    fn tag(&self) -> Tag {
        self.kind().request_tag()
    }

    fn body(&self) -> Vec<u8> {
        self.write_body(ByteWriter::new()).into_vec()
    }

    /// Total serialized size including trailers
    fn param_size(&self) -> u32 {
        compute_total_size(HEADER_SIZE + self.body().len(), self.kind().trailer_count())
    }

    /// Serialize with `trailers` appended in session order
    fn to_frame(&self, trailers: &[&[u8]]) -> Result<Vec<u8>> {
        let bytes = frame::encode(self.tag(), self.ordinal(), &self.body(), trailers)?;
        debug_assert_eq!(bytes.len(), self.param_size() as usize);
        Ok(bytes)
    }

    /// Serialize a command that carries no trailers
    fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_frame(&[])
    }
}

/// Implements [`FramesAsBytes`] header accessors for a struct with a
/// `header: CommandHeader` field
macro_rules! command_header {
    () => {
        fn header(&self) -> &CommandHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut CommandHeader {
            &mut self.header
        }
    };
}

pub(crate) use command_header;

/// Fields covered by the input parameter digest
pub trait SuppliesAuthDigestFields: FramesAsBytes {
    /// Fields after the ordinal; key and entity handles are left out
    fn write_auth_digest_fields(&self, writer: ByteWriter) -> ByteWriter {
        self.write_body(writer)
    }

    /// `SHA1(ordinal || digest fields)`
    fn in_param_digest(&self) -> Digest {
        let fields = self.write_auth_digest_fields(ByteWriter::new()).into_vec();
        sha1(&[&self.ordinal().to_be_bytes(), &fields])
    }
}

/// Hook for commands that carry secrets masked under the session secret
pub trait EncryptsSecretsGivenSession {
    /// Runs after the session's nonceOdd has been rotated
    fn encrypt_secrets(&mut self, _session: &AuthSession) -> Result<()> {
        Ok(())
    }
}

/// Decoded response of a command
pub trait CommandOutput: Sized {
    /// Absolute offset of the first output byte covered by the output
    /// parameter digest; outputs with leading handles start later
    const HMAC_START: usize = BODY_OFFSET;

    fn decode(view: &FrameView<'_>) -> Result<Self>;
}

/// A command with a typed output
pub trait TpmCommand: SuppliesAuthDigestFields + EncryptsSecretsGivenSession {
    type Output: CommandOutput;

    /// Digest the response HMAC is computed over
    fn out_param_digest(&self, response: &[u8], view: &FrameView<'_>) -> Result<Digest> {
        default_out_param_digest(self.ordinal(), Self::Output::HMAC_START, response, view)
    }
}

/// `SHA1(rc || ordinal || response[hmac_start..trailers])`
pub fn default_out_param_digest(
    ordinal: u32,
    hmac_start: usize,
    response: &[u8],
    view: &FrameView<'_>,
) -> Result<Digest> {
    let end = view.trailer_offset();
    if end < hmac_start {
        return Err(FrameError::Truncated {
            offset: hmac_start,
            needed: hmac_start - end,
            available: 0,
        }
        .into());
    }
    let (covered, _) = read_bytes(response, hmac_start, end - hmac_start)?;
    Ok(sha1(&[
        &view.code().to_be_bytes(),
        &ordinal.to_be_bytes(),
        covered,
    ]))
}

/// Raw request and response of one exchange, with the decoded output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange<O> {
    pub request: Vec<u8>,
    pub response: Vec<u8>,
    pub output: O,
}

/// Return code and body bytes, for responses without a typed decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueOutput {
    pub return_code: u32,
    pub body: Vec<u8>,
}

impl OpaqueOutput {
    pub fn from_frame(bytes: &[u8]) -> Result<Self> {
        let view = frame::decode_response(bytes)?;
        Ok(Self::from_view(&view))
    }

    pub fn from_view(view: &FrameView<'_>) -> Self {
        Self {
            return_code: view.code(),
            body: view.body.to_vec(),
        }
    }
}

impl CommandOutput for OpaqueOutput {
    fn decode(view: &FrameView<'_>) -> Result<Self> {
        Ok(Self::from_view(view))
    }
}

/// Commands with no output parameters
impl CommandOutput for () {
    fn decode(_view: &FrameView<'_>) -> Result<Self> {
        Ok(())
    }
}

/// Decode a response and surface a non-zero return code as an error
pub(crate) fn decode_checked(ordinal: u32, response: &[u8]) -> Result<FrameView<'_>> {
    let view = frame::decode_response(response)?;
    if view.code() != TPM_SUCCESS {
        return Err(TpmError::return_code(ordinal, view.code()));
    }
    Ok(view)
}

/// Require the number of response trailers a successful exchange carries
pub(crate) fn expect_trailers(view: &FrameView<'_>, expected: usize) -> Result<()> {
    if view.trailers.len() != expected {
        return Err(FrameError::TrailerCount {
            tag: view.tag() as u16,
            expected,
            got: view.trailers.len(),
        }
        .into());
    }
    Ok(())
}

/// Send a command with no authorization trailers
///
/// Only plain commands and commands switched to no-auth qualify.
pub fn execute_direct<C: TpmCommand>(tpm: &Tpm, cmd: &C) -> Result<Exchange<C::Output>> {
    if cmd.kind() != CommandKind::Plain {
        return Err(TpmError::IllegalArgument(
            "authorized command sent without a session",
        ));
    }
    let request = cmd.to_bytes()?;
    debug!(
        ordinal = %ordinal_name(cmd.ordinal()),
        size = request.len(),
        "executing unauthorized command"
    );
    let response = tpm.transmit(&request)?;
    let view = decode_checked(cmd.ordinal(), &response)?;
    let output = C::Output::decode(&view)?;
    Ok(Exchange {
        request,
        response,
        output,
    })
}

/// Plain command with a raw body, for tests and replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    header: CommandHeader,
    body: Vec<u8>,
    digest_skip: usize,
}

impl RawCommand {
    pub fn new(kind: CommandKind, ordinal: u32, body: Vec<u8>) -> Self {
        Self {
            header: CommandHeader::new(kind, ordinal),
            body,
            digest_skip: 0,
        }
    }

    /// Leave the first `skip` body bytes (handles) out of the auth digest
    pub fn with_digest_skip(mut self, skip: usize) -> Self {
        self.digest_skip = skip;
        self
    }
}

impl FramesAsBytes for RawCommand {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_bytes(&self.body)
    }
}

impl SuppliesAuthDigestFields for RawCommand {
    fn write_auth_digest_fields(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_bytes(self.body.get(self.digest_skip..).unwrap_or_default())
    }
}

impl EncryptsSecretsGivenSession for RawCommand {}

impl TpmCommand for RawCommand {
    type Output = OpaqueOutput;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpm12_verify::frame::{AUTH_IN_SIZE, AUTH_OUT_SIZE};

    #[test]
    fn test_no_auth_switch_drops_one_trailer() {
        let mut cmd = RawCommand::new(CommandKind::Auth1, 0xE6, vec![0; 36]);
        let before = cmd.param_size();
        assert_eq!(before, (HEADER_SIZE + 36 + AUTH_IN_SIZE) as u32);
        assert_eq!(cmd.tag(), Tag::RquAuth1Command);

        cmd.switch_to_no_auth().unwrap();
        assert!(cmd.is_no_auth());
        assert_eq!(cmd.param_size(), before - AUTH_IN_SIZE as u32);
        assert_eq!(cmd.tag(), Tag::RquCommand);
        assert_eq!(cmd.to_bytes().unwrap().len(), cmd.param_size() as usize);
    }

    #[test]
    fn test_no_auth_switch_is_one_way() {
        let mut cmd = RawCommand::new(CommandKind::Auth1, 0x10, vec![]);
        cmd.switch_to_no_auth().unwrap();
        assert!(matches!(
            cmd.switch_to_no_auth(),
            Err(TpmError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_no_auth_switch_rejected_for_two_sessions() {
        let mut cmd = RawCommand::new(CommandKind::Auth2, 0xE8, vec![0; 24]);
        assert!(matches!(
            cmd.switch_to_no_auth(),
            Err(TpmError::UnsupportedOperation(_))
        ));
        assert!(!cmd.is_no_auth());
        assert_eq!(cmd.param_size(), (HEADER_SIZE + 24 + 2 * AUTH_IN_SIZE) as u32);
    }

    #[test]
    fn test_in_param_digest_skips_handles() {
        let cmd = RawCommand::new(CommandKind::Auth1, 0x20, vec![0xAA, 0xBB, 0xCC, 0xDD, 1, 2])
            .with_digest_skip(4);
        assert_eq!(
            cmd.in_param_digest(),
            sha1(&[&0x20u32.to_be_bytes(), &[1, 2]])
        );
    }

    #[test]
    fn test_default_out_digest_covers_body_before_trailer() {
        let rsp = frame::encode(Tag::RspAuth1Command, 0, &[1, 2, 3, 4], &[&[0; AUTH_OUT_SIZE]]).unwrap();
        let view = frame::decode(&rsp).unwrap();
        assert_eq!(
            default_out_param_digest(0x15, BODY_OFFSET, &rsp, &view).unwrap(),
            sha1(&[&0u32.to_be_bytes(), &0x15u32.to_be_bytes(), &[1, 2, 3, 4]])
        );
        // Leading handle excluded
        assert_eq!(
            default_out_param_digest(0x15, BODY_OFFSET + 4, &rsp, &view).unwrap(),
            sha1(&[&0u32.to_be_bytes(), &0x15u32.to_be_bytes()])
        );
    }

    #[test]
    fn test_decode_checked_surfaces_return_code() {
        let rsp = frame::encode(Tag::RspCommand, 1, &[], &[]).unwrap();
        assert!(matches!(
            decode_checked(0x0A, &rsp),
            Err(TpmError::TpmReturnCode {
                ordinal: 0x0A,
                code: 1,
                name: "TPM_AUTHFAIL"
            })
        ));
    }
}
