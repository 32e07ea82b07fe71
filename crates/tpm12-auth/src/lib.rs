// SPDX-License-Identifier: MIT OR Apache-2.0

//! TPM 1.2 authorized command execution
//!
//! Host side of the TPM 1.1/1.2 authorization protocol: commands are
//! framed, bound to one or two HMAC authorization sessions, sent through
//! a [`Driver`], and their responses verified before the output is
//! handed back. Transport sessions wrap commands in `ExecuteTransport`
//! and keep a log that [`tpm12_verify`] can check offline.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::rc::Rc;

use anyhow::{bail, Context};
use tracing::debug;

use tpm12_verify::frame::HEADER_SIZE;

pub mod auth2;
pub mod command;
pub mod commands;
pub mod crypto;
pub mod error;
pub mod oiap;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

#[cfg(test)]
mod transport_tests;

pub use auth2::{authorize_auth2, execute_auth2, verify_auth2_response};
pub use command::{
    execute_direct, CommandHeader, CommandKind, CommandOutput, EncryptsSecretsGivenSession,
    Exchange, FramesAsBytes, OpaqueOutput, RawCommand, SuppliesAuthDigestFields, TpmCommand,
};
pub use error::{Result, TpmError};
pub use registry::{DecodedOutput, OutputRegistry};
pub use session::AuthSession;
pub use transport::{InnerAuth, TransportConfig, TransportSession, Unwrapped};

/// TPM 1.2 command ordinals
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TpmOrd {
    Oiap = 0x0000_000A,
    Osap = 0x0000_000B,
    ChangeAuthOwner = 0x0000_0010,
    Extend = 0x0000_0014,
    PcrRead = 0x0000_0015,
    GetRandom = 0x0000_0046,
    GetCapability = 0x0000_0065,
    TerminateHandle = 0x0000_0096,
    EstablishTransport = 0x0000_00E6,
    ExecuteTransport = 0x0000_00E7,
    ReleaseTransportSigned = 0x0000_00E8,
}

impl TpmOrd {
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            0x0000_000A => Some(TpmOrd::Oiap),
            0x0000_000B => Some(TpmOrd::Osap),
            0x0000_0010 => Some(TpmOrd::ChangeAuthOwner),
            0x0000_0014 => Some(TpmOrd::Extend),
            0x0000_0015 => Some(TpmOrd::PcrRead),
            0x0000_0046 => Some(TpmOrd::GetRandom),
            0x0000_0065 => Some(TpmOrd::GetCapability),
            0x0000_0096 => Some(TpmOrd::TerminateHandle),
            0x0000_00E6 => Some(TpmOrd::EstablishTransport),
            0x0000_00E7 => Some(TpmOrd::ExecuteTransport),
            0x0000_00E8 => Some(TpmOrd::ReleaseTransportSigned),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TpmOrd::Oiap => "TPM_OIAP",
            TpmOrd::Osap => "TPM_OSAP",
            TpmOrd::ChangeAuthOwner => "TPM_ChangeAuthOwner",
            TpmOrd::Extend => "TPM_Extend",
            TpmOrd::PcrRead => "TPM_PcrRead",
            TpmOrd::GetRandom => "TPM_GetRandom",
            TpmOrd::GetCapability => "TPM_GetCapability",
            TpmOrd::TerminateHandle => "TPM_Terminate_Handle",
            TpmOrd::EstablishTransport => "TPM_EstablishTransport",
            TpmOrd::ExecuteTransport => "TPM_ExecuteTransport",
            TpmOrd::ReleaseTransportSigned => "TPM_ReleaseTransportSigned",
        }
    }
}

/// Symbolic name of an ordinal, for logging
pub fn ordinal_name(ordinal: u32) -> &'static str {
    TpmOrd::from_u32(ordinal).map_or("TPM_ORD_UNKNOWN", |ord| ord.name())
}

/// Storage root key handle
pub const TPM_KH_SRK: u32 = 0x4000_0000;

/// Owner handle
pub const TPM_KH_OWNER: u32 = 0x4000_0001;

/// Handle for an unencrypted transport session secret
pub const TPM_KH_TRANSPORT: u32 = 0x4000_0003;

/// Entity types for OSAP
pub const TPM_ET_KEYHANDLE: u16 = 0x0001;
pub const TPM_ET_OWNER: u16 = 0x0002;

/// Capability areas and properties
pub const TPM_CAP_PROPERTY: u32 = 0x0000_0005;
pub const TPM_CAP_PROP_MANUFACTURER: u32 = 0x0000_0103;

/// Protocol id for ChangeAuthOwner
pub const TPM_PID_ADCP: u16 = 0x0004;

/// Byte transport to a TPM
///
/// One call is one complete exchange: the full request goes in, the full
/// response comes back. Timeouts and retries, if any, belong here.
pub trait Driver {
    fn transmit(&mut self, command: &[u8]) -> anyhow::Result<Vec<u8>>;
}

impl<F> Driver for F
where
    F: FnMut(&[u8]) -> anyhow::Result<Vec<u8>>,
{
    fn transmit(&mut self, command: &[u8]) -> anyhow::Result<Vec<u8>> {
        self(command)
    }
}

/// Character device driver (`/dev/tpm0`)
pub struct DeviceDriver {
    device: File,
}

impl DeviceDriver {
    pub const DEFAULT_PATH: &'static str = "/dev/tpm0";

    /// Open the default TPM device
    pub fn open() -> anyhow::Result<Self> {
        Self::open_path(Self::DEFAULT_PATH)
    }

    /// Open a specific TPM device path
    pub fn open_path(path: &str) -> anyhow::Result<Self> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .context(format!("Failed to open TPM device at {}", path))?;

        Ok(Self { device })
    }
}

impl Driver for DeviceDriver {
    fn transmit(&mut self, command: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.device
            .write_all(command)
            .context("Failed to write TPM command")?;

        // Read response header first to learn paramSize
        let mut response = vec![0u8; HEADER_SIZE];
        self.device
            .read_exact(&mut response)
            .context("Failed to read TPM response header")?;

        let size = u32::from_be_bytes([response[2], response[3], response[4], response[5]]) as usize;
        if size < HEADER_SIZE {
            bail!("Invalid TPM response size: {}", size);
        }

        response.resize(size, 0);
        self.device
            .read_exact(&mut response[HEADER_SIZE..])
            .context("Failed to read TPM response body")?;

        Ok(response)
    }
}

/// Shared handle to one TPM
///
/// Sessions keep a clone of the handle they were started on; two
/// handles refer to the same device iff they were cloned from one
/// another. Exchanges are strictly sequential, so the driver sits behind
/// a `RefCell` and the handle is not `Send`.
#[derive(Clone)]
pub struct Tpm {
    driver: Rc<RefCell<dyn Driver>>,
}

impl Tpm {
    pub fn new<D: Driver + 'static>(driver: D) -> Self {
        Self {
            driver: Rc::new(RefCell::new(driver)),
        }
    }

    /// Open the TPM device (defaults to /dev/tpm0)
    pub fn open() -> anyhow::Result<Self> {
        Ok(Self::new(DeviceDriver::open()?))
    }

    pub fn open_path(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(DeviceDriver::open_path(path)?))
    }

    /// Send a request and return the raw response
    pub fn transmit(&self, command: &[u8]) -> Result<Vec<u8>> {
        debug!(
            len = command.len(),
            request = %hex::encode(command),
            "transmit"
        );
        let response = self
            .driver
            .try_borrow_mut()
            .map_err(|_| TpmError::IllegalArgument("re-entrant TPM exchange"))?
            .transmit(command)
            .map_err(TpmError::Driver)?;
        debug!(
            len = response.len(),
            response = %hex::encode(&response),
            "receive"
        );
        Ok(response)
    }

    /// Whether both handles drive the same device
    pub fn same_device(&self, other: &Tpm) -> bool {
        Rc::ptr_eq(&self.driver, &other.driver)
    }
}
