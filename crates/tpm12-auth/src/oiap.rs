// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session establishment: OIAP, OSAP and handle termination

use tracing::debug;

use tpm12_verify::codec::{read_digest, read_u32, ByteWriter};
use tpm12_verify::frame::FrameView;
use tpm12_verify::{Nonce, Secret};

use crate::command::{
    command_header, execute_direct, CommandHeader, CommandKind, CommandOutput,
    EncryptsSecretsGivenSession, Exchange, FramesAsBytes, SuppliesAuthDigestFields, TpmCommand,
};
use crate::crypto::{hmac_sha1, random_nonce};
use crate::error::Result;
use crate::session::AuthSession;
use crate::{Tpm, TpmOrd};

// ============================================================================
// Commands
// ============================================================================

/// TPM_OIAP
#[derive(Debug, Clone)]
pub struct Oiap {
    header: CommandHeader,
}

impl Oiap {
    pub fn new() -> Self {
        Self {
            header: CommandHeader::new(CommandKind::Plain, TpmOrd::Oiap as u32),
        }
    }
}

impl Default for Oiap {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OiapOutput {
    pub auth_handle: u32,
    pub nonce_even: Nonce,
}

impl CommandOutput for OiapOutput {
    fn decode(view: &FrameView<'_>) -> Result<Self> {
        let (auth_handle, off) = read_u32(view.body, 0)?;
        let (nonce_even, _) = read_digest(view.body, off)?;
        Ok(Self {
            auth_handle,
            nonce_even,
        })
    }
}

impl FramesAsBytes for Oiap {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer
    }
}

impl SuppliesAuthDigestFields for Oiap {}
impl EncryptsSecretsGivenSession for Oiap {}

impl TpmCommand for Oiap {
    type Output = OiapOutput;
}

/// TPM_OSAP
#[derive(Debug, Clone)]
pub struct Osap {
    header: CommandHeader,
    pub entity_type: u16,
    pub entity_value: u32,
    pub nonce_odd_osap: Nonce,
}

impl Osap {
    pub fn new(entity_type: u16, entity_value: u32, nonce_odd_osap: Nonce) -> Self {
        Self {
            header: CommandHeader::new(CommandKind::Plain, TpmOrd::Osap as u32),
            entity_type,
            entity_value,
            nonce_odd_osap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsapOutput {
    pub auth_handle: u32,
    pub nonce_even: Nonce,
    pub nonce_even_osap: Nonce,
}

impl CommandOutput for OsapOutput {
    fn decode(view: &FrameView<'_>) -> Result<Self> {
        let (auth_handle, off) = read_u32(view.body, 0)?;
        let (nonce_even, off) = read_digest(view.body, off)?;
        let (nonce_even_osap, _) = read_digest(view.body, off)?;
        Ok(Self {
            auth_handle,
            nonce_even,
            nonce_even_osap,
        })
    }
}

impl FramesAsBytes for Osap {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer
            .write_u16(self.entity_type)
            .write_u32(self.entity_value)
            .write_bytes(&self.nonce_odd_osap)
    }
}

impl SuppliesAuthDigestFields for Osap {}
impl EncryptsSecretsGivenSession for Osap {}

impl TpmCommand for Osap {
    type Output = OsapOutput;
}

/// TPM_Terminate_Handle
#[derive(Debug, Clone)]
pub struct TerminateHandle {
    header: CommandHeader,
    pub handle: u32,
}

impl TerminateHandle {
    pub fn new(handle: u32) -> Self {
        Self {
            header: CommandHeader::new(CommandKind::Plain, TpmOrd::TerminateHandle as u32),
            handle,
        }
    }
}

impl FramesAsBytes for TerminateHandle {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_u32(self.handle)
    }
}

impl SuppliesAuthDigestFields for TerminateHandle {}
impl EncryptsSecretsGivenSession for TerminateHandle {}

impl TpmCommand for TerminateHandle {
    type Output = ();
}

// ============================================================================
// Session lifecycle
// ============================================================================

impl AuthSession {
    /// Start this session with TPM_OIAP
    ///
    /// OIAP sessions are not bound to an entity: set the shared secret to
    /// the usage auth of whatever the next command authorizes.
    pub fn start_oiap(&mut self) -> Result<()> {
        self.ensure_inactive()?;
        let out = execute_direct(self.tpm(), &Oiap::new())?.output;
        debug!(handle = %format!("0x{:08X}", out.auth_handle), "OIAP session started");
        self.activate(out.auth_handle, out.nonce_even, [0u8; 20]);
        Ok(())
    }

    /// Start this session with TPM_OSAP bound to one entity
    ///
    /// The shared secret is `HMAC(entityAuth, nonceEvenOSAP || nonceOddOSAP)`.
    pub fn start_osap(&mut self, entity_type: u16, entity_value: u32, entity_auth: &Secret) -> Result<()> {
        self.ensure_inactive()?;
        let nonce_odd_osap = random_nonce();
        let cmd = Osap::new(entity_type, entity_value, nonce_odd_osap);
        let out = execute_direct(self.tpm(), &cmd)?.output;
        let shared_secret = hmac_sha1(entity_auth, &[&out.nonce_even_osap, &nonce_odd_osap])?;
        debug!(
            handle = %format!("0x{:08X}", out.auth_handle),
            entity_type,
            entity_value = %format!("0x{:08X}", entity_value),
            "OSAP session started"
        );
        self.activate(out.auth_handle, out.nonce_even, shared_secret);
        Ok(())
    }

    /// Release the session handle on the TPM
    pub fn terminate(&mut self) -> Result<()> {
        self.ensure_active()?;
        execute_direct(self.tpm(), &TerminateHandle::new(self.handle()))?;
        self.deactivate();
        Ok(())
    }
}

/// New OIAP session whose secret is `usage_auth`
pub fn oiap(tpm: &Tpm, usage_auth: &Secret) -> Result<AuthSession> {
    let mut session = AuthSession::new(tpm.clone());
    session.start_oiap()?;
    session.set_shared_secret(*usage_auth);
    Ok(session)
}

/// New OSAP session for `entity_value`
pub fn osap(tpm: &Tpm, entity_type: u16, entity_value: u32, entity_auth: &Secret) -> Result<AuthSession> {
    let mut session = AuthSession::new(tpm.clone());
    session.start_osap(entity_type, entity_value, entity_auth)?;
    Ok(session)
}

/// Execute under a fresh OIAP session that ends with the command
///
/// Commands that carry no authorization skip the session.
pub fn execute_one_shot<C: TpmCommand>(
    tpm: &Tpm,
    cmd: &mut C,
    usage_auth: &Secret,
) -> Result<Exchange<C::Output>> {
    if cmd.kind() == CommandKind::Plain {
        return execute_direct(tpm, cmd);
    }
    let mut session = oiap(tpm, usage_auth)?;
    session.execute_exchange(cmd, false)
}
