// SPDX-License-Identifier: MIT OR Apache-2.0

//! Concrete commands used around transport sessions
//!
//! Each command supplies its body and digest fields; framing, session
//! handling and verification live in [`crate::command`] and the session
//! modules.

use tpm12_verify::codec::{read_digest, read_sized, read_u32, ByteWriter};
use tpm12_verify::frame::FrameView;
use tpm12_verify::{Digest, FrameError, Secret};

use crate::command::{
    command_header, execute_direct, CommandHeader, CommandKind, CommandOutput,
    EncryptsSecretsGivenSession, FramesAsBytes, SuppliesAuthDigestFields, TpmCommand,
};
use crate::error::Result;
use crate::session::AuthSession;
use crate::{Tpm, TpmOrd, TPM_CAP_PROPERTY, TPM_CAP_PROP_MANUFACTURER, TPM_ET_OWNER, TPM_PID_ADCP};

// ============================================================================
// TPM_PcrRead
// ============================================================================

#[derive(Debug, Clone)]
pub struct PcrRead {
    header: CommandHeader,
    pub pcr_index: u32,
}

impl PcrRead {
    pub fn new(pcr_index: u32) -> Self {
        Self {
            header: CommandHeader::new(CommandKind::Plain, TpmOrd::PcrRead as u32),
            pcr_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcrReadOutput {
    pub digest: Digest,
}

impl CommandOutput for PcrReadOutput {
    fn decode(view: &FrameView<'_>) -> Result<Self> {
        let (digest, _) = read_digest(view.body, 0)?;
        Ok(Self { digest })
    }
}

impl FramesAsBytes for PcrRead {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_u32(self.pcr_index)
    }
}

impl SuppliesAuthDigestFields for PcrRead {}
impl EncryptsSecretsGivenSession for PcrRead {}

impl TpmCommand for PcrRead {
    type Output = PcrReadOutput;
}

// ============================================================================
// TPM_Extend
// ============================================================================

#[derive(Debug, Clone)]
pub struct Extend {
    header: CommandHeader,
    pub pcr_num: u32,
    pub in_digest: Digest,
}

impl Extend {
    pub fn new(pcr_num: u32, in_digest: Digest) -> Self {
        Self {
            header: CommandHeader::new(CommandKind::Plain, TpmOrd::Extend as u32),
            pcr_num,
            in_digest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendOutput {
    pub out_digest: Digest,
}

impl CommandOutput for ExtendOutput {
    fn decode(view: &FrameView<'_>) -> Result<Self> {
        let (out_digest, _) = read_digest(view.body, 0)?;
        Ok(Self { out_digest })
    }
}

impl FramesAsBytes for Extend {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_u32(self.pcr_num).write_bytes(&self.in_digest)
    }
}

impl SuppliesAuthDigestFields for Extend {}
impl EncryptsSecretsGivenSession for Extend {}

impl TpmCommand for Extend {
    type Output = ExtendOutput;
}

// ============================================================================
// TPM_GetRandom
// ============================================================================

#[derive(Debug, Clone)]
pub struct GetRandom {
    header: CommandHeader,
    pub bytes_requested: u32,
}

impl GetRandom {
    pub fn new(bytes_requested: u32) -> Self {
        Self {
            header: CommandHeader::new(CommandKind::Plain, TpmOrd::GetRandom as u32),
            bytes_requested,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRandomOutput {
    pub random_bytes: Vec<u8>,
}

impl CommandOutput for GetRandomOutput {
    fn decode(view: &FrameView<'_>) -> Result<Self> {
        let (random_bytes, _) = read_sized(view.body, 0)?;
        Ok(Self {
            random_bytes: random_bytes.to_vec(),
        })
    }
}

impl FramesAsBytes for GetRandom {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_u32(self.bytes_requested)
    }
}

impl SuppliesAuthDigestFields for GetRandom {}
impl EncryptsSecretsGivenSession for GetRandom {}

impl TpmCommand for GetRandom {
    type Output = GetRandomOutput;
}

// ============================================================================
// TPM_GetCapability
// ============================================================================

#[derive(Debug, Clone)]
pub struct GetCapability {
    header: CommandHeader,
    pub cap_area: u32,
    pub sub_cap: Vec<u8>,
}

impl GetCapability {
    pub fn new(cap_area: u32, sub_cap: Vec<u8>) -> Self {
        Self {
            header: CommandHeader::new(CommandKind::Plain, TpmOrd::GetCapability as u32),
            cap_area,
            sub_cap,
        }
    }

    /// TPM_CAP_PROPERTY / TPM_CAP_PROP_MANUFACTURER
    pub fn manufacturer() -> Self {
        Self::new(
            TPM_CAP_PROPERTY,
            TPM_CAP_PROP_MANUFACTURER.to_be_bytes().to_vec(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCapabilityOutput {
    pub resp: Vec<u8>,
}

impl GetCapabilityOutput {
    /// Response interpreted as a single `u32` property
    pub fn as_u32(&self) -> Result<u32> {
        if self.resp.len() != 4 {
            return Err(FrameError::SizeMismatch {
                declared: 4,
                actual: self.resp.len(),
            }
            .into());
        }
        Ok(read_u32(&self.resp, 0)?.0)
    }
}

impl CommandOutput for GetCapabilityOutput {
    fn decode(view: &FrameView<'_>) -> Result<Self> {
        let (resp, _) = read_sized(view.body, 0)?;
        Ok(Self {
            resp: resp.to_vec(),
        })
    }
}

impl FramesAsBytes for GetCapability {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer.write_u32(self.cap_area).write_sized(&self.sub_cap)
    }
}

impl SuppliesAuthDigestFields for GetCapability {}
impl EncryptsSecretsGivenSession for GetCapability {}

impl TpmCommand for GetCapability {
    type Output = GetCapabilityOutput;
}

/// Manufacturer id reported by the TPM (e.g. `0x49465800` for Infineon)
pub fn get_manufacturer(tpm: &Tpm) -> Result<u32> {
    execute_direct(tpm, &GetCapability::manufacturer())?
        .output
        .as_u32()
}

// ============================================================================
// TPM_ChangeAuthOwner
// ============================================================================

/// TPM_ChangeAuthOwner, run under an OSAP session on the owner
///
/// The new auth travels masked with the OSAP shared secret and the
/// session's current nonceEven.
#[derive(Debug, Clone)]
pub struct ChangeAuthOwner {
    header: CommandHeader,
    pub entity_type: u16,
    new_auth: Secret,
    enc_new_auth: Secret,
}

impl ChangeAuthOwner {
    /// Change the owner auth itself
    pub fn owner(new_auth: Secret) -> Self {
        Self::new(TPM_ET_OWNER, new_auth)
    }

    pub fn new(entity_type: u16, new_auth: Secret) -> Self {
        Self {
            header: CommandHeader::new(CommandKind::Auth1, TpmOrd::ChangeAuthOwner as u32),
            entity_type,
            new_auth,
            enc_new_auth: [0u8; 20],
        }
    }

    /// Masked auth as last sent
    pub fn enc_new_auth(&self) -> &Secret {
        &self.enc_new_auth
    }
}

impl FramesAsBytes for ChangeAuthOwner {
    command_header!();

    fn write_body(&self, writer: ByteWriter) -> ByteWriter {
        writer
            .write_u16(TPM_PID_ADCP)
            .write_bytes(&self.enc_new_auth)
            .write_u16(self.entity_type)
    }
}

impl SuppliesAuthDigestFields for ChangeAuthOwner {}

impl EncryptsSecretsGivenSession for ChangeAuthOwner {
    fn encrypt_secrets(&mut self, session: &AuthSession) -> Result<()> {
        self.enc_new_auth = session.mask_with_even(&self.new_auth);
        Ok(())
    }
}

impl TpmCommand for ChangeAuthOwner {
    type Output = ();
}
