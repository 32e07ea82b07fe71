// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordinal-keyed output decoding
//!
//! Maps a command ordinal to a decoder for its response, for callers
//! that only have raw bytes, such as a transport log read back from
//! disk. Unknown ordinals, non-zero return codes and undecodable bodies
//! all come back as [`DecodedOutput::Opaque`].

use std::collections::HashMap;
use std::fmt;

use tpm12_verify::frame::{self, FrameView};
use tpm12_verify::result_code::TPM_SUCCESS;
use tpm12_verify::TransportLogEntry;

use crate::command::CommandOutput;
use crate::commands::{ExtendOutput, GetCapabilityOutput, GetRandomOutput, PcrReadOutput};
use crate::error::Result;
use crate::oiap::{OiapOutput, OsapOutput};
use crate::transport::{
    EstablishTransportOutput, ExecuteTransportOutput, ReleaseTransportSignedOutput,
};
use crate::TpmOrd;

/// Response decoded by ordinal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedOutput {
    PcrRead(PcrReadOutput),
    Extend(ExtendOutput),
    GetRandom(GetRandomOutput),
    GetCapability(GetCapabilityOutput),
    Oiap(OiapOutput),
    Osap(OsapOutput),
    EstablishTransport(EstablishTransportOutput),
    ExecuteTransport(ExecuteTransportOutput),
    ReleaseTransportSigned(ReleaseTransportSignedOutput),
    /// Successful response without output parameters
    Empty,
    /// Raw response bytes
    Opaque(Vec<u8>),
}

impl DecodedOutput {
    pub fn is_opaque(&self) -> bool {
        matches!(self, DecodedOutput::Opaque(_))
    }
}

impl fmt::Display for DecodedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedOutput::PcrRead(out) => write!(f, "PCR value {}", hex::encode(out.digest)),
            DecodedOutput::Extend(out) => write!(f, "extended to {}", hex::encode(out.out_digest)),
            DecodedOutput::GetRandom(out) => write!(f, "{} random bytes", out.random_bytes.len()),
            DecodedOutput::GetCapability(out) => write!(f, "capability {}", hex::encode(&out.resp)),
            DecodedOutput::Oiap(out) => write!(f, "OIAP handle 0x{:08X}", out.auth_handle),
            DecodedOutput::Osap(out) => write!(f, "OSAP handle 0x{:08X}", out.auth_handle),
            DecodedOutput::EstablishTransport(out) => write!(
                f,
                "transport 0x{:08X} at tick {}",
                out.trans_handle, out.current_ticks.current_ticks
            ),
            DecodedOutput::ExecuteTransport(out) => write!(
                f,
                "wrapped response of {} bytes at tick {}",
                out.wrapped_rsp.len(),
                out.current_ticks
            ),
            DecodedOutput::ReleaseTransportSigned(out) => write!(
                f,
                "{}-byte signature at tick {}",
                out.signature.len(),
                out.current_ticks.current_ticks
            ),
            DecodedOutput::Empty => write!(f, "no output"),
            DecodedOutput::Opaque(bytes) => write!(f, "opaque {}", hex::encode(bytes)),
        }
    }
}

type Decoder = Box<dyn Fn(&FrameView<'_>) -> Result<DecodedOutput>>;

/// Ordinal to response decoder map
pub struct OutputRegistry {
    decoders: HashMap<u32, Decoder>,
}

impl fmt::Debug for OutputRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ordinals: Vec<_> = self.decoders.keys().copied().collect();
        ordinals.sort_unstable();
        f.debug_struct("OutputRegistry")
            .field("ordinals", &ordinals)
            .finish()
    }
}

impl Default for OutputRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl OutputRegistry {
    /// Registry with no decoders
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registry covering every command in this crate
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TpmOrd::PcrRead as u32, DecodedOutput::PcrRead);
        registry.register(TpmOrd::Extend as u32, DecodedOutput::Extend);
        registry.register(TpmOrd::GetRandom as u32, DecodedOutput::GetRandom);
        registry.register(TpmOrd::GetCapability as u32, DecodedOutput::GetCapability);
        registry.register(TpmOrd::Oiap as u32, DecodedOutput::Oiap);
        registry.register(TpmOrd::Osap as u32, DecodedOutput::Osap);
        registry.register(
            TpmOrd::EstablishTransport as u32,
            DecodedOutput::EstablishTransport,
        );
        registry.register(
            TpmOrd::ExecuteTransport as u32,
            DecodedOutput::ExecuteTransport,
        );
        registry.register(
            TpmOrd::ReleaseTransportSigned as u32,
            DecodedOutput::ReleaseTransportSigned,
        );
        registry.register(TpmOrd::TerminateHandle as u32, |()| DecodedOutput::Empty);
        registry.register(TpmOrd::ChangeAuthOwner as u32, |()| DecodedOutput::Empty);
        registry
    }

    /// Decode responses to `ordinal` as `O`, replacing any earlier decoder
    pub fn register<O, F>(&mut self, ordinal: u32, wrap: F)
    where
        O: CommandOutput + 'static,
        F: Fn(O) -> DecodedOutput + 'static,
    {
        self.decoders
            .insert(ordinal, Box::new(move |view: &FrameView<'_>| O::decode(view).map(&wrap)));
    }

    pub fn contains(&self, ordinal: u32) -> bool {
        self.decoders.contains_key(&ordinal)
    }

    /// Decode a raw response to `ordinal`
    pub fn decode(&self, ordinal: u32, response: &[u8]) -> DecodedOutput {
        let opaque = || DecodedOutput::Opaque(response.to_vec());
        let Some(decoder) = self.decoders.get(&ordinal) else {
            return opaque();
        };
        match frame::decode_response(response) {
            Ok(view) if view.code() == TPM_SUCCESS => decoder(&view).unwrap_or_else(|_| opaque()),
            _ => opaque(),
        }
    }

    /// Decode the response the caller saw for a log entry
    ///
    /// Returns the caller's ordinal with the decoded unwrapped output.
    pub fn decode_entry(&self, entry: &TransportLogEntry) -> Result<(u32, DecodedOutput)> {
        let ordinal = entry.orig_ordinal()?;
        Ok((ordinal, self.decode(ordinal, &entry.unwrapped_out)))
    }
}
