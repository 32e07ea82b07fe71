// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for authorized command execution

use thiserror::Error;
use tpm12_verify::{result_name, FrameError, VerifyError};

/// Errors raised while framing, authorizing or executing a TPM command
#[derive(Debug, Error)]
pub enum TpmError {
    /// Decode-time structural problem in a response (or a command we built)
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    /// Operation attempted on a session in the wrong state
    #[error("Session 0x{handle:08X}: {reason}")]
    SessionState { handle: u32, reason: &'static str },

    /// Response HMAC did not match for any of the listed sessions
    #[error(
        "Authorization data mismatch for ordinal 0x{ordinal:08X} (sessions {})",
        format_handles(.handles)
    )]
    AuthOutDataMismatch {
        ordinal: u32,
        handles: Vec<u32>,
        response: Vec<u8>,
    },

    /// The TPM answered with a non-zero TPM_RESULT
    #[error("TPM returned 0x{code:08X} ({name}) for ordinal 0x{ordinal:08X}")]
    TpmReturnCode {
        ordinal: u32,
        code: u32,
        name: &'static str,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("Illegal argument: {0}")]
    IllegalArgument(&'static str),

    /// Transport-level failure from the driver, passed through unchanged
    #[error("Driver error: {0:#}")]
    Driver(anyhow::Error),

    #[error(transparent)]
    Verify(#[from] VerifyError),
}

impl TpmError {
    pub fn return_code(ordinal: u32, code: u32) -> Self {
        TpmError::TpmReturnCode {
            ordinal,
            code,
            name: result_name(code),
        }
    }

    pub fn session_state(handle: u32, reason: &'static str) -> Self {
        TpmError::SessionState { handle, reason }
    }
}

impl From<anyhow::Error> for TpmError {
    fn from(err: anyhow::Error) -> Self {
        TpmError::Driver(err)
    }
}

fn format_handles(handles: &[u32]) -> String {
    handles
        .iter()
        .map(|h| format!("0x{:08X}", h))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T, E = TpmError> = std::result::Result<T, E>;
