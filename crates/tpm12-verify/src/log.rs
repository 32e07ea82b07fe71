// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport session audit log
//!
//! A log records every exchange carried by one transport session, in
//! order: the establish exchange, each wrapped command, and the signed
//! release. Entries keep raw frames only, so the log can be serialized,
//! shipped elsewhere and verified without the TPM or the command types
//! that produced it.
//!
//! The TPM folds each exchange into `transDigest` as
//! `SHA1(transDigest || LOG_IN)` followed by `SHA1(transDigest || LOG_OUT)`
//! and signs the final value inside a TPM_SIGN_INFO on release.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{read_bytes, read_digest, read_sized, read_u32, read_u64, Decode, Digest, Encode, Nonce};
use crate::digest::{sha1, unwrapped_output_digest, wrapped_command_digest};
use crate::error::{FrameError, InvalidLogReason, VerifyError};
use crate::frame::{decode_request, decode_response, FrameView};
use crate::signature::verify_sha1_rsa;
use crate::structs::{CurrentTicks, SignInfo, TransportLogIn, TransportLogOut, TransportPublic};

/// TPM_ORD_EstablishTransport
pub const TPM_ORD_ESTABLISH_TRANSPORT: u32 = 0x0000_00E6;
/// TPM_ORD_ExecuteTransport
pub const TPM_ORD_EXECUTE_TRANSPORT: u32 = 0x0000_00E7;
/// TPM_ORD_ReleaseTransportSigned
pub const TPM_ORD_RELEASE_TRANSPORT_SIGNED: u32 = 0x0000_00E8;

/// Manufacturer id reported by TPM_CAP_PROP_MANUFACTURER when unknown
pub const TPM_MANUFACTURER_UNKNOWN: u32 = 0;
/// "IFX\0"
pub const TPM_MANUFACTURER_INFINEON: u32 = 0x4946_5800;
/// "BRCM"
pub const TPM_MANUFACTURER_BROADCOM: u32 = 0x4252_434D;

/// How a chip represents "no digest" inside the transport log chain
///
/// Broadcom and ST parts seed `transDigest` with an empty string and
/// omit the pubKeyHash of a LOG_IN when no keys are involved. Infineon
/// parts use an all-zero TPM_DIGEST for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorQuirk {
    ZeroedDigest,
    EmptyDigest,
}

impl VendorQuirk {
    pub fn from_manufacturer(manufacturer: u32) -> Self {
        match manufacturer {
            TPM_MANUFACTURER_INFINEON => VendorQuirk::ZeroedDigest,
            _ => VendorQuirk::EmptyDigest,
        }
    }

    /// Initial value of `transDigest`
    pub fn initial_digest(self) -> Vec<u8> {
        match self {
            VendorQuirk::ZeroedDigest => vec![0u8; 20],
            VendorQuirk::EmptyDigest => Vec::new(),
        }
    }

    /// pubKeyHash used in a LOG_IN when the command involves no keys
    pub fn empty_pub_key_hash(self) -> Option<Digest> {
        match self {
            VendorQuirk::ZeroedDigest => Some([0u8; 20]),
            VendorQuirk::EmptyDigest => None,
        }
    }
}

/// Stable identifier of what an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Establish,
    Execute,
    Release,
}

impl EntryKind {
    /// Ordinal of the envelope command recorded by this kind of entry
    pub fn envelope_ordinal(self) -> u32 {
        match self {
            EntryKind::Establish => TPM_ORD_ESTABLISH_TRANSPORT,
            EntryKind::Execute => TPM_ORD_EXECUTE_TRANSPORT,
            EntryKind::Release => TPM_ORD_RELEASE_TRANSPORT_SIGNED,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Establish => write!(f, "establish"),
            EntryKind::Execute => write!(f, "execute"),
            EntryKind::Release => write!(f, "release"),
        }
    }
}

/// One recorded exchange
///
/// For establish and release entries the command is not wrapped, so
/// `orig_cmd == wrap_cmd` and `wrap_out == unwrapped_out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportLogEntry {
    pub kind: EntryKind,
    /// Command as given by the caller
    #[serde(with = "hex::serde")]
    pub orig_cmd: Vec<u8>,
    /// Command as sent to the TPM (the envelope for wrapped commands)
    #[serde(with = "hex::serde")]
    pub wrap_cmd: Vec<u8>,
    /// Response as received from the TPM
    #[serde(with = "hex::serde")]
    pub wrap_out: Vec<u8>,
    /// Inner response carried by the envelope
    #[serde(with = "hex::serde")]
    pub unwrapped_out: Vec<u8>,
}

impl TransportLogEntry {
    pub fn establish(cmd: Vec<u8>, out: Vec<u8>) -> Self {
        Self {
            kind: EntryKind::Establish,
            orig_cmd: cmd.clone(),
            wrap_cmd: cmd,
            wrap_out: out.clone(),
            unwrapped_out: out,
        }
    }

    pub fn execute(inner_cmd: Vec<u8>, wrap_cmd: Vec<u8>, wrap_out: Vec<u8>, inner_out: Vec<u8>) -> Self {
        Self {
            kind: EntryKind::Execute,
            orig_cmd: inner_cmd,
            wrap_cmd,
            wrap_out,
            unwrapped_out: inner_out,
        }
    }

    pub fn release(cmd: Vec<u8>, out: Vec<u8>) -> Self {
        Self {
            kind: EntryKind::Release,
            orig_cmd: cmd.clone(),
            wrap_cmd: cmd,
            wrap_out: out.clone(),
            unwrapped_out: out,
        }
    }

    /// Ordinal of the command the caller issued
    pub fn orig_ordinal(&self) -> Result<u32, FrameError> {
        Ok(decode_request(&self.orig_cmd)?.code())
    }

    fn envelope(&self) -> Result<(FrameView<'_>, FrameView<'_>), FrameError> {
        Ok((decode_request(&self.wrap_cmd)?, decode_response(&self.wrap_out)?))
    }

    /// TPM_CURRENT_TICKS reported by an establish response
    pub fn establish_ticks(&self) -> Result<CurrentTicks, FrameError> {
        let (_, out) = self.envelope()?;
        // transHandle(4) | locality(4) | currentTicks
        CurrentTicks::decode_at(out.body, 8).map(|(ticks, _)| ticks)
    }

    /// Anti-replay nonce of a release command
    pub fn anti_replay(&self) -> Result<Nonce, FrameError> {
        let (cmd, _) = self.envelope()?;
        read_digest(cmd.body, 4).map(|(nonce, _)| nonce)
    }

    /// Signature carried by a release response
    pub fn signature(&self) -> Result<Vec<u8>, FrameError> {
        let (_, out) = self.envelope()?;
        // locality(4) | currentTicks(32) | sigSize(4) | sig
        read_sized(out.body, 4 + CurrentTicks::SIZE).map(|(sig, _)| sig.to_vec())
    }

    /// LOG_IN contribution, if this kind of entry has one
    pub fn log_in(&self, quirk: VendorQuirk) -> Result<Option<TransportLogIn>, FrameError> {
        let parameters = match self.kind {
            EntryKind::Establish => {
                let (cmd, _) = self.envelope()?;
                // encHandle(4) | transPublic | secretSize(4) | secret
                let (_, off) = TransportPublic::decode_at(cmd.body, 4)?;
                let (_, end) = read_sized(cmd.body, off)?;
                let (params, _) = read_bytes(cmd.body, 4, end - 4)?;
                sha1(&[&cmd.code().to_be_bytes(), params])
            }
            EntryKind::Execute => wrapped_command_digest(&self.orig_cmd)?,
            EntryKind::Release => return Ok(None),
        };
        Ok(Some(TransportLogIn {
            parameters,
            pub_key_hash: quirk.empty_pub_key_hash(),
        }))
    }

    /// LOG_OUT contribution
    ///
    /// `start_ticks` comes from the establish entry: execute responses
    /// only report a tick count, so the tick rate and nonce are reused.
    pub fn log_out(&self, start_ticks: &CurrentTicks) -> Result<TransportLogOut, FrameError> {
        let (cmd, out) = self.envelope()?;
        let ordinal = cmd.code().to_be_bytes();
        match self.kind {
            EntryKind::Establish => {
                let (locality, off) = read_u32(out.body, 4)?;
                let (current_ticks, off) = CurrentTicks::decode_at(out.body, off)?;
                let (_, end) = read_digest(out.body, off)?;
                let (params, _) = read_bytes(out.body, 4, end - 4)?;
                Ok(TransportLogOut {
                    current_ticks,
                    parameters: sha1(&[&out.code().to_be_bytes(), &ordinal, params]),
                    locality,
                })
            }
            EntryKind::Execute => {
                let (ticks, off) = read_u64(out.body, 0)?;
                let (locality, _) = read_u32(out.body, off)?;
                let inner_ordinal = self.orig_ordinal()?;
                Ok(TransportLogOut {
                    current_ticks: start_ticks.at(ticks),
                    parameters: unwrapped_output_digest(inner_ordinal, &self.unwrapped_out)?,
                    locality,
                })
            }
            EntryKind::Release => {
                let (anti_replay, _) = read_digest(cmd.body, 4)?;
                let (locality, off) = read_u32(out.body, 0)?;
                let (current_ticks, _) = CurrentTicks::decode_at(out.body, off)?;
                Ok(TransportLogOut {
                    current_ticks,
                    parameters: sha1(&[&ordinal, &anti_replay]),
                    locality,
                })
            }
        }
    }

    /// Check the envelope ordinal and, for wrapped commands, that the
    /// unwrapped output is the one the envelope carried
    fn check(&self, index: usize) -> Result<(), InvalidLogReason> {
        let entry_err = |source| InvalidLogReason::Entry { index, source };
        let (cmd, out) = self.envelope().map_err(entry_err)?;
        let expected = self.kind.envelope_ordinal();
        if cmd.code() != expected {
            return Err(InvalidLogReason::WrongOrdinal {
                index,
                expected,
                got: cmd.code(),
            });
        }
        if self.kind == EntryKind::Execute {
            // currentTicks(8) | locality(4) | wrappedRspSize(4) | wrappedRsp
            let (wrapped, _) = read_sized(out.body, 12).map_err(entry_err)?;
            if wrapped != self.unwrapped_out.as_slice() {
                return Err(InvalidLogReason::WrappedOutputMismatch { index });
            }
        }
        Ok(())
    }
}

/// Fold every entry into the transport digest
///
/// The first entry must be an establish entry (it supplies the tick
/// session for later entries); establish and release may appear only at
/// the ends.
pub fn compute_chained_digest(
    entries: &[TransportLogEntry],
    quirk: VendorQuirk,
) -> Result<Digest, VerifyError> {
    let first = entries.first().ok_or(InvalidLogReason::Empty)?;
    if first.kind != EntryKind::Establish {
        return Err(InvalidLogReason::FirstNotEstablish { got: first.kind }.into());
    }
    let start_ticks = first
        .establish_ticks()
        .map_err(|source| InvalidLogReason::Entry { index: 0, source })?;

    let mut trans_digest = quirk.initial_digest();
    for (index, entry) in entries.iter().enumerate() {
        let misplaced = match entry.kind {
            EntryKind::Establish => index != 0,
            EntryKind::Execute => false,
            EntryKind::Release => index != entries.len() - 1,
        };
        if misplaced {
            return Err(InvalidLogReason::MisplacedEntry {
                index,
                kind: entry.kind,
            }
            .into());
        }
        entry.check(index)?;

        let entry_err = |source| InvalidLogReason::Entry { index, source };
        if let Some(log_in) = entry.log_in(quirk).map_err(entry_err)? {
            trans_digest = sha1(&[&trans_digest, &log_in.to_bytes()]).to_vec();
        }
        let log_out = entry.log_out(&start_ticks).map_err(entry_err)?;
        trans_digest = sha1(&[&trans_digest, &log_out.to_bytes()]).to_vec();
        debug!(index, kind = %entry.kind, digest = %hex::encode(&trans_digest), "folded log entry");
    }

    let mut out = [0u8; 20];
    out.copy_from_slice(&trans_digest);
    Ok(out)
}

/// Ordered, append-only record of one transport session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportLog {
    manufacturer: u32,
    quirk: VendorQuirk,
    entries: Vec<TransportLogEntry>,
}

impl TransportLog {
    /// Empty log whose quirk is chosen from the manufacturer id
    pub fn new(manufacturer: u32) -> Self {
        Self::with_quirk(manufacturer, VendorQuirk::from_manufacturer(manufacturer))
    }

    pub fn with_quirk(manufacturer: u32, quirk: VendorQuirk) -> Self {
        Self {
            manufacturer,
            quirk,
            entries: Vec::new(),
        }
    }

    pub fn manufacturer(&self) -> u32 {
        self.manufacturer
    }

    pub fn quirk(&self) -> VendorQuirk {
        self.quirk
    }

    pub fn push(&mut self, entry: TransportLogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TransportLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn release_entry(&self) -> Result<&TransportLogEntry, VerifyError> {
        if self.entries.len() < 2 {
            return Err(InvalidLogReason::TooShort {
                entries: self.entries.len(),
            }
            .into());
        }
        let last = &self.entries[self.entries.len() - 1];
        if last.kind != EntryKind::Release {
            return Err(InvalidLogReason::LastNotRelease { got: last.kind }.into());
        }
        Ok(last)
    }

    /// Anti-replay nonce supplied to the release command
    pub fn anti_replay(&self) -> Result<Nonce, VerifyError> {
        let index = self.entries.len().saturating_sub(1);
        self.release_entry()?
            .anti_replay()
            .map_err(|source| InvalidLogReason::Entry { index, source }.into())
    }

    /// Signature returned by the release command
    pub fn signature(&self) -> Result<Vec<u8>, VerifyError> {
        let index = self.entries.len().saturating_sub(1);
        self.release_entry()?
            .signature()
            .map_err(|source| InvalidLogReason::Entry { index, source }.into())
    }

    pub fn chained_digest(&self) -> Result<Digest, VerifyError> {
        compute_chained_digest(&self.entries, self.quirk)
    }

    /// TPM_SIGN_INFO the TPM signed on release
    pub fn sign_info(&self) -> Result<SignInfo, VerifyError> {
        let anti_replay = self.anti_replay()?;
        let trans_digest = self.chained_digest()?;
        Ok(SignInfo::transport(anti_replay, trans_digest))
    }

    /// Check the release signature against an RSA modulus (exponent 65537)
    ///
    /// Structural problems in the log are errors; a signature that does
    /// not match is `Ok(false)`.
    pub fn verify(&self, modulus: &[u8]) -> Result<bool, VerifyError> {
        let sign_info = self.sign_info()?;
        let signature = self.signature()?;
        verify_sha1_rsa(modulus, &signature, &sign_info.to_bytes())
    }

    pub fn to_document(&self) -> TransportLogDocument {
        TransportLogDocument {
            manufacturer: self.manufacturer,
            quirk: self.quirk,
            entries: self.entries.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, VerifyError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn from_json(json: &str) -> Result<Self, VerifyError> {
        let doc: TransportLogDocument = serde_json::from_str(json)?;
        Ok(doc.into())
    }
}

/// Serialized form of a [`TransportLog`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportLogDocument {
    pub manufacturer: u32,
    pub quirk: VendorQuirk,
    pub entries: Vec<TransportLogEntry>,
}

impl From<TransportLogDocument> for TransportLog {
    fn from(doc: TransportLogDocument) -> Self {
        Self {
            manufacturer: doc.manufacturer,
            quirk: doc.quirk,
            entries: doc.entries,
        }
    }
}
