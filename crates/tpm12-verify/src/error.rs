// SPDX-License-Identifier: MIT OR Apache-2.0

//! Verification error types

use thiserror::Error;

use crate::log::EntryKind;

/// Errors that can occur while decoding or verifying a transport log
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Invalid hex encoding: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Invalid log document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    #[error("Invalid transport log: {0}")]
    InvalidLog(#[from] InvalidLogReason),

    #[error("Invalid RSA public key: {0}")]
    InvalidKey(#[from] InvalidKeyReason),
}

// =============================================================================
// FrameError
// =============================================================================

/// Structural problems found while decoding a frame or wire structure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Integer overflow at offset {offset}")]
    Overflow { offset: usize },

    #[error("Unknown frame tag 0x{tag:04X}")]
    UnknownTag { tag: u16 },

    #[error("paramSize {param_size} is below the minimum {minimum} for this tag")]
    SizeTooSmall { param_size: u32, minimum: usize },

    #[error("paramSize {param_size} exceeds buffer length {len}")]
    SizeExceedsBuffer { param_size: u32, len: usize },

    #[error("Tag 0x{tag:04X} carries {expected} trailer(s), got {got}")]
    TrailerCount { tag: u16, expected: usize, got: usize },

    #[error("Trailer must be {expected} bytes, got {got}")]
    TrailerSize { expected: usize, got: usize },

    #[error("Expected a {expected} frame")]
    WrongDirection { expected: &'static str },

    #[error("Structure tag mismatch: expected 0x{expected:04X}, got 0x{got:04X}")]
    StructureTag { expected: u16, got: u16 },

    #[error("Declared size {declared} does not match {actual} bytes present")]
    SizeMismatch { declared: usize, actual: usize },
}

// =============================================================================
// InvalidLogReason
// =============================================================================

#[derive(Debug, Error)]
pub enum InvalidLogReason {
    #[error("Log has {entries} entries, a signed log needs at least 2")]
    TooShort { entries: usize },

    #[error("Log is empty")]
    Empty,

    #[error("First entry must be an establish entry, got {got}")]
    FirstNotEstablish { got: EntryKind },

    #[error("Last entry must be a release entry, got {got}")]
    LastNotRelease { got: EntryKind },

    #[error("Entry {index}: {kind} entry is not allowed at this position")]
    MisplacedEntry { index: usize, kind: EntryKind },

    #[error("Entry {index}: expected ordinal 0x{expected:08X}, got 0x{got:08X}")]
    WrongOrdinal { index: usize, expected: u32, got: u32 },

    #[error("Entry {index}: wrapped response does not match the unwrapped output")]
    WrappedOutputMismatch { index: usize },

    #[error("Entry {index}: {source}")]
    Entry {
        index: usize,
        #[source]
        source: FrameError,
    },
}

// =============================================================================
// InvalidKeyReason
// =============================================================================

#[derive(Debug, Error)]
pub enum InvalidKeyReason {
    #[error("Modulus is empty")]
    EmptyModulus,

    #[error("RSA key rejected: {0}")]
    Rejected(String),
}
