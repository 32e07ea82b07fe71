// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport sessions
//!
//! A transport session is an authorization session whose commands are
//! wrapped in TPM_ExecuteTransport. Every exchange (establish, each
//! wrapped command, the signed release) is appended to a
//! [`TransportLog`], and the release signature covers the digest the TPM
//! chained over that same sequence, so the log can later be verified
//! without the TPM.
//!
//! Wrapped commands keep their own authorization: an Auth1 or Auth2
//! command is authorized by its sessions first, and the serialized
//! request, trailers included, becomes the envelope's payload.
//!
//! Only unencrypted sessions are supported: wrapping a command in a
//! session with the ENCRYPT attribute fails with `UnsupportedOperation`.

use tracing::debug;

use tpm12_verify::codec::{read_digest, read_sized, read_u32, read_u64, ByteWriter, Decode};
use tpm12_verify::digest::{sha1, unwrapped_output_digest, wrapped_command_digest};
use tpm12_verify::frame::{self, FrameView, BODY_OFFSET};
use tpm12_verify::result_code::TPM_SUCCESS;
use tpm12_verify::{
    CurrentTicks, Digest, Encode, Nonce, Secret, TransportLog, TransportLogEntry,
    TransportPublic, VendorQuirk,
};

use crate::auth2::{authorize_auth2, execute_auth2_exchange, verify_auth2_response};
use crate::command::{
    command_header, CommandHeader, CommandKind, CommandOutput, EncryptsSecretsGivenSession,
    FramesAsBytes, SuppliesAuthDigestFields, TpmCommand,
};
use crate::commands::get_manufacturer;
use crate::crypto::WELL_KNOWN_SECRET;
use crate::error::{Result, TpmError};
use crate::oiap::{execute_one_shot, oiap};
use crate::session::AuthSession;
use crate::{ordinal_name, Tpm, TpmOrd, TPM_KH_TRANSPORT};

// ============================================================================
// Configuration
// ============================================================================

/// Transport session attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub trans_attributes: u32,
    pub alg_id: u32,
    pub enc_scheme: u16,
    /// Log digest convention; detected from the manufacturer when `None`
    pub quirk: Option<VendorQuirk>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let public = TransportPublic::default();
        Self {
            trans_attributes: public.trans_attributes,
            alg_id: public.alg_id,
            enc_scheme: public.enc_scheme,
            quirk: None,
        }
    }
}

impl TransportConfig {
    pub fn with_attributes(mut self, trans_attributes: u32) -> Self {
        self.trans_attributes = trans_attributes;
        self
    }

    pub fn with_quirk(mut self, quirk: VendorQuirk) -> Self {
        self.quirk = Some(quirk);
        self
    }

    pub fn public(&self) -> TransportPublic {
        TransportPublic {
            trans_attributes: self.trans_attributes,
            alg_id: self.alg_id,
            enc_scheme: self.enc_scheme,
        }
    }
}

// ============================================================================
// TPM_EstablishTransport
// ============================================================================

/// TPM_EstablishTransport
///
/// Authorized by the key at `enc_handle`, or sent without authorization
/// when the secret is not encrypted (`TPM_KH_TRANSPORT`).
#[derive(Debug, Clone)]
pub struct EstablishTransport {
    header: CommandHeader,
    pub enc_handle: u32,
    pub public: TransportPublic,
    pub secret: Vec<u8>,
}

impl EstablishTransport {
    pub fn new(enc_handle: u32, public: TransportPublic, secret: Vec<u8>) -> Self {
        Self {
            header: CommandHeader::new(CommandKind::Auth1, TpmOrd::EstablishTransport as u32),
            enc_handle,
            public,
            secret,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstablishTransportOutput {
    pub trans_handle: u32,
    pub locality: u32,
    pub current_ticks: CurrentTicks,
    pub trans_nonce: Nonce,
}

impl CommandOutput for EstablishTransportOutput {
    // transHandle is not covered
    const HMAC_START: usize = BODY_OFFSET + 4;

    fn decode(view: &FrameView<'_>) -> Result<Self> {
        let (trans_handle, off) = read_u32(view.body, 0)?;
        let (locality, off) = read_u32(view.body, off)?;
        let (current_ticks, off) = CurrentTicks::decode_at(view.body, off)?;
        let (trans_nonce, _) = read_digest(view.body, off)?;
        Ok(Self {
            trans_handle,
            locality,
            current_ticks,
            trans_nonce,
        })
    }
}

impl FramesAsBytes for EstablishTransport {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer
            .write_u32(self.enc_handle)
            .write_struct(&self.public)
            .write_sized(&self.secret)
    }
}

impl SuppliesAuthDigestFields for EstablishTransport {
    fn write_auth_digest_fields(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_struct(&self.public).write_sized(&self.secret)
    }
}

impl EncryptsSecretsGivenSession for EstablishTransport {}

impl TpmCommand for EstablishTransport {
    type Output = EstablishTransportOutput;
}

// ============================================================================
// TPM_ExecuteTransport
// ============================================================================

/// TPM_ExecuteTransport carrying one serialized inner command
///
/// The input digest covers `wrappedCmdSize || H1` and the output digest
/// `ticks || locality || wrappedRspSize || H2`, where H1 and H2 digest the
/// inner command and response without handles or trailers.
#[derive(Debug, Clone)]
pub struct ExecuteTransport {
    header: CommandHeader,
    wrapped_cmd: Vec<u8>,
    inner_ordinal: u32,
    wrapped_digest: Digest,
}

impl ExecuteTransport {
    pub fn new(wrapped_cmd: Vec<u8>) -> Result<Self> {
        let inner_ordinal = frame::decode_request(&wrapped_cmd)?.code();
        let wrapped_digest = wrapped_command_digest(&wrapped_cmd)?;
        Ok(Self {
            header: CommandHeader::new(CommandKind::Auth1, TpmOrd::ExecuteTransport as u32),
            wrapped_cmd,
            inner_ordinal,
            wrapped_digest,
        })
    }

    pub fn wrapped_cmd(&self) -> &[u8] {
        &self.wrapped_cmd
    }

    pub fn inner_ordinal(&self) -> u32 {
        self.inner_ordinal
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteTransportOutput {
    pub current_ticks: u64,
    pub locality: u32,
    pub wrapped_rsp: Vec<u8>,
}

impl CommandOutput for ExecuteTransportOutput {
    fn decode(view: &FrameView<'_>) -> Result<Self> {
        let (current_ticks, off) = read_u64(view.body, 0)?;
        let (locality, off) = read_u32(view.body, off)?;
        let (wrapped_rsp, _) = read_sized(view.body, off)?;
        Ok(Self {
            current_ticks,
            locality,
            wrapped_rsp: wrapped_rsp.to_vec(),
        })
    }
}

impl FramesAsBytes for ExecuteTransport {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_sized(&self.wrapped_cmd)
    }
}

impl SuppliesAuthDigestFields for ExecuteTransport {
    fn write_auth_digest_fields(&self, writer: ByteWriter) -> ByteWriter {
        writer
            .write_u32(self.wrapped_cmd.len() as u32)
            .write_bytes(&self.wrapped_digest)
    }
}

impl EncryptsSecretsGivenSession for ExecuteTransport {}

impl TpmCommand for ExecuteTransport {
    type Output = ExecuteTransportOutput;

    fn out_param_digest(&self, _response: &[u8], view: &FrameView<'_>) -> Result<Digest> {
        // currentTicks(8) | locality(4) | wrappedRspSize(4) | wrappedRsp
        let (wrapped_rsp, _) = read_sized(view.body, 12)?;
        let inner_digest = unwrapped_output_digest(self.inner_ordinal, wrapped_rsp)?;
        Ok(sha1(&[
            &view.code().to_be_bytes(),
            &self.ordinal().to_be_bytes(),
            &view.body[..16],
            &inner_digest,
        ]))
    }
}

// ============================================================================
// TPM_ReleaseTransportSigned
// ============================================================================

/// TPM_ReleaseTransportSigned
///
/// Authorized by the signing key (session 1) and the transport session
/// itself (session 2).
#[derive(Debug, Clone)]
pub struct ReleaseTransportSigned {
    header: CommandHeader,
    pub key_handle: u32,
    pub anti_replay: Nonce,
}

impl ReleaseTransportSigned {
    pub fn new(key_handle: u32, anti_replay: Nonce) -> Self {
        Self {
            header: CommandHeader::new(
                CommandKind::Auth2,
                TpmOrd::ReleaseTransportSigned as u32,
            ),
            key_handle,
            anti_replay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTransportSignedOutput {
    pub locality: u32,
    pub current_ticks: CurrentTicks,
    pub signature: Vec<u8>,
}

impl CommandOutput for ReleaseTransportSignedOutput {
    fn decode(view: &FrameView<'_>) -> Result<Self> {
        let (locality, off) = read_u32(view.body, 0)?;
        let (current_ticks, off) = CurrentTicks::decode_at(view.body, off)?;
        let (signature, _) = read_sized(view.body, off)?;
        Ok(Self {
            locality,
            current_ticks,
            signature: signature.to_vec(),
        })
    }
}

impl FramesAsBytes for ReleaseTransportSigned {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_u32(self.key_handle).write_bytes(&self.anti_replay)
    }
}

impl SuppliesAuthDigestFields for ReleaseTransportSigned {
    fn write_auth_digest_fields(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_bytes(&self.anti_replay)
    }
}

impl EncryptsSecretsGivenSession for ReleaseTransportSigned {}

impl TpmCommand for ReleaseTransportSigned {
    type Output = ReleaseTransportSignedOutput;
}

// ============================================================================
// Session
// ============================================================================

/// Inner response of a wrapped command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unwrapped<O> {
    /// Decoded into the command's output type
    Output(O),
    /// Raw inner response: a non-zero return code or an undecodable body
    Opaque(Vec<u8>),
}

impl<O> Unwrapped<O> {
    pub fn output(self) -> Option<O> {
        match self {
            Unwrapped::Output(output) => Some(output),
            Unwrapped::Opaque(_) => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Unwrapped::Opaque(_))
    }
}

/// Sessions authorizing a wrapped command
#[derive(Debug)]
pub enum InnerAuth<'a> {
    /// Plain command, or one switched to no-auth
    None,
    Auth1 {
        session: &'a mut AuthSession,
        continue_session: bool,
    },
    /// Secrets are masked under `session1`
    Auth2 {
        session1: &'a mut AuthSession,
        continue1: bool,
        session2: &'a mut AuthSession,
        continue2: bool,
    },
}

/// Logged transport session
#[derive(Debug)]
pub struct TransportSession {
    session: AuthSession,
    public: TransportPublic,
    log: TransportLog,
}

impl TransportSession {
    /// Session object for `tpm`, with the log quirk detected from the
    /// TPM's manufacturer unless configured. Not started yet.
    pub fn new(tpm: &Tpm, config: TransportConfig) -> Result<Self> {
        let manufacturer = get_manufacturer(tpm)?;
        Ok(Self::with_manufacturer(tpm, config, manufacturer))
    }

    /// Session object for a TPM whose manufacturer is already known
    pub fn with_manufacturer(tpm: &Tpm, config: TransportConfig, manufacturer: u32) -> Self {
        let quirk = config
            .quirk
            .unwrap_or_else(|| VendorQuirk::from_manufacturer(manufacturer));
        Self {
            session: AuthSession::new(tpm.clone()),
            public: config.public(),
            log: TransportLog::with_quirk(manufacturer, quirk),
        }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn public(&self) -> &TransportPublic {
        &self.public
    }

    pub fn log(&self) -> &TransportLog {
        &self.log
    }

    pub fn into_log(self) -> TransportLog {
        self.log
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    pub fn is_encrypted(&self) -> bool {
        self.public.is_encrypted()
    }

    /// Establish the session and record it as the first log entry
    ///
    /// Without `key_auth`, or with `TPM_KH_TRANSPORT`, the establish
    /// command is sent without authorization; otherwise it runs under a
    /// one-shot OIAP session with the key's usage auth. The session's
    /// shared secret is `plain_secret`. Returns the transport handle.
    pub fn start(
        &mut self,
        enc_handle: u32,
        key_auth: Option<&Secret>,
        enc_secret: &[u8],
        plain_secret: &Secret,
    ) -> Result<u32> {
        self.session.ensure_inactive()?;
        if !self.log.is_empty() {
            return Err(TpmError::session_state(
                self.session.handle(),
                "transport session already used",
            ));
        }

        let mut cmd = EstablishTransport::new(enc_handle, self.public, enc_secret.to_vec());
        let use_auth = enc_handle != TPM_KH_TRANSPORT && key_auth.is_some();
        if !use_auth {
            cmd.switch_to_no_auth()?;
        }
        let exchange = execute_one_shot(
            self.session.tpm(),
            &mut cmd,
            key_auth.unwrap_or(&WELL_KNOWN_SECRET),
        )?;
        let out = exchange.output;

        self.log
            .push(TransportLogEntry::establish(exchange.request, exchange.response));
        self.session
            .activate(out.trans_handle, out.trans_nonce, *plain_secret);
        debug!(
            handle = %format!("0x{:08X}", out.trans_handle),
            locality = out.locality,
            ticks = out.current_ticks.current_ticks,
            quirk = ?self.log.quirk(),
            "transport session established"
        );
        Ok(out.trans_handle)
    }

    fn ensure_unencrypted(&self) -> Result<()> {
        if self.is_encrypted() {
            return Err(TpmError::UnsupportedOperation(
                "encrypted transport sessions",
            ));
        }
        Ok(())
    }

    fn ensure_same_device(&self, session: &AuthSession) -> Result<()> {
        if !self.session.tpm().same_device(session.tpm()) {
            return Err(TpmError::IllegalArgument(
                "inner session is bound to a different TPM",
            ));
        }
        Ok(())
    }

    fn unwrap<O: CommandOutput>(inner_rsp: &[u8]) -> Unwrapped<O> {
        let decoded = frame::decode_response(inner_rsp)
            .ok()
            .filter(|view| view.code() == TPM_SUCCESS)
            .and_then(|view| O::decode(&view).ok());
        match decoded {
            Some(output) => Unwrapped::Output(output),
            None => Unwrapped::Opaque(inner_rsp.to_vec()),
        }
    }

    /// Send `inner_cmd` in an ExecuteTransport envelope and log the
    /// exchange once the envelope has been verified
    fn execute_envelope(
        &mut self,
        inner_cmd: Vec<u8>,
        continue_session: bool,
    ) -> Result<(ExecuteTransportOutput, Vec<u8>)> {
        let mut envelope = ExecuteTransport::new(inner_cmd.clone())?;
        let exchange = self.session.execute_exchange(&mut envelope, continue_session)?;
        let inner_rsp = exchange.output.wrapped_rsp.clone();
        debug!(
            ordinal = %ordinal_name(envelope.inner_ordinal()),
            ticks = exchange.output.current_ticks,
            wrapped_rsp_len = inner_rsp.len(),
            "wrapped command executed"
        );
        self.log.push(TransportLogEntry::execute(
            inner_cmd,
            exchange.request,
            exchange.response,
            inner_rsp.clone(),
        ));
        Ok((exchange.output, inner_rsp))
    }

    /// Execute an unauthorized `cmd` inside TPM_ExecuteTransport
    ///
    /// Returns the envelope output and the unwrapped inner output. The
    /// log entry is appended after the envelope has been verified.
    /// Commands that carry authorization go through
    /// [`TransportSession::execute_transport_authorized`].
    pub fn execute_transport<C: TpmCommand>(
        &mut self,
        cmd: &C,
        continue_session: bool,
    ) -> Result<(ExecuteTransportOutput, Unwrapped<C::Output>)> {
        self.session.ensure_active()?;
        self.ensure_unencrypted()?;
        if cmd.kind() != CommandKind::Plain {
            return Err(TpmError::IllegalArgument(
                "authorized command wrapped without its sessions",
            ));
        }
        let (envelope, inner_rsp) = self.execute_envelope(cmd.to_bytes()?, continue_session)?;
        Ok((envelope, Self::unwrap::<C::Output>(&inner_rsp)))
    }

    /// Execute `cmd` inside TPM_ExecuteTransport under its own sessions
    ///
    /// The inner command is authorized with `auth` before it is wrapped,
    /// and a successful inner response is checked against the same
    /// sessions: a resAuth mismatch fails with `AuthOutDataMismatch`
    /// even though the exchange is already in the log, since the TPM
    /// chained it. An inner error code comes back as
    /// [`Unwrapped::Opaque`] and leaves the inner sessions untouched.
    pub fn execute_transport_authorized<C: TpmCommand>(
        &mut self,
        cmd: &mut C,
        mut auth: InnerAuth<'_>,
        continue_session: bool,
    ) -> Result<(ExecuteTransportOutput, Unwrapped<C::Output>)> {
        self.session.ensure_active()?;
        self.ensure_unencrypted()?;

        let inner_cmd = match (cmd.kind(), &mut auth) {
            (CommandKind::Plain, InnerAuth::None) => cmd.to_bytes()?,
            (
                CommandKind::Auth1,
                InnerAuth::Auth1 {
                    session,
                    continue_session: continue_inner,
                },
            ) => {
                self.ensure_same_device(session)?;
                session.authorize(cmd, *continue_inner)?
            }
            (
                CommandKind::Auth2,
                InnerAuth::Auth2 {
                    session1,
                    continue1,
                    session2,
                    continue2,
                },
            ) => {
                self.ensure_same_device(session1)?;
                self.ensure_same_device(session2)?;
                authorize_auth2(cmd, session1, *continue1, session2, *continue2)?
            }
            _ => {
                return Err(TpmError::IllegalArgument(
                    "inner sessions do not match the command kind",
                ))
            }
        };

        let (envelope, inner_rsp) = self.execute_envelope(inner_cmd, continue_session)?;
        let succeeded = frame::decode_response(&inner_rsp)
            .map(|view| view.code() == TPM_SUCCESS)
            .unwrap_or(false);
        if !succeeded {
            return Ok((envelope, Unwrapped::Opaque(inner_rsp)));
        }
        let output = match auth {
            InnerAuth::None => return Ok((envelope, Self::unwrap::<C::Output>(&inner_rsp))),
            InnerAuth::Auth1 {
                session,
                continue_session: continue_inner,
            } => session.verify_response(cmd, &inner_rsp, continue_inner)?,
            InnerAuth::Auth2 {
                session1,
                continue1,
                session2,
                ..
            } => verify_auth2_response(cmd, &inner_rsp, session1, continue1, session2)?,
        };
        Ok((envelope, Unwrapped::Output(output)))
    }

    /// Execute `cmd` inside the session and return its inner output
    pub fn execute_wrapped<C: TpmCommand>(
        &mut self,
        cmd: &C,
        continue_session: bool,
    ) -> Result<Unwrapped<C::Output>> {
        self.execute_transport(cmd, continue_session)
            .map(|(_, unwrapped)| unwrapped)
    }

    /// Authorize `cmd` with `auth`, execute it inside the session and
    /// return its inner output
    pub fn execute_wrapped_authorized<C: TpmCommand>(
        &mut self,
        cmd: &mut C,
        auth: InnerAuth<'_>,
        continue_session: bool,
    ) -> Result<Unwrapped<C::Output>> {
        self.execute_transport_authorized(cmd, auth, continue_session)
            .map(|(_, unwrapped)| unwrapped)
    }

    /// Close the session with a signature over the log digest
    ///
    /// Runs as an Auth2 exchange: a fresh OIAP session carrying
    /// `key_auth` authorizes the signing key and this session authorizes
    /// the release; neither is continued.
    pub fn release_signed(
        &mut self,
        key_handle: u32,
        anti_replay: &Nonce,
        key_auth: &Secret,
    ) -> Result<ReleaseTransportSignedOutput> {
        self.session.ensure_active()?;
        let mut cmd = ReleaseTransportSigned::new(key_handle, *anti_replay);
        let mut key_session = oiap(self.session.tpm(), key_auth)?;
        let exchange =
            execute_auth2_exchange(&mut cmd, &mut key_session, false, &mut self.session, false)?;

        self.log
            .push(TransportLogEntry::release(exchange.request, exchange.response));
        self.session.deactivate();
        debug!(
            entries = self.log.len(),
            signature_len = exchange.output.signature.len(),
            "transport session released"
        );
        Ok(exchange.output)
    }

    /// Verify the log against the signing key's modulus
    pub fn verify(&self, modulus: &[u8]) -> Result<bool> {
        Ok(self.log.verify(modulus)?)
    }

    /// TPM_SIGN_INFO the release signature should cover
    pub fn sign_info_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.log.sign_info()?.to_bytes())
    }
}
