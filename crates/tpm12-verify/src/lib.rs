// SPDX-License-Identifier: MIT OR Apache-2.0

//! TPM 1.2 transport log verification
//!
//! Pure, device-free half of the TPM 1.2 authorization stack: the wire
//! codec and frame layout shared with the command side, and everything
//! needed to check a signed transport session log offline.
//!
//! ```text
//! TransportLog ──chained digest──► TPM_SIGN_INFO("TRAN", antiReplay, transDigest)
//!                                        │
//!                          RSA PKCS#1 v1.5 / SHA-1 (e = 65537)
//!                                        │
//!                           signature from ReleaseTransportSigned
//! ```

pub mod codec;
pub mod digest;
pub mod error;
pub mod frame;
pub mod log;
pub mod result_code;
pub mod signature;
pub mod structs;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;


pub use codec::{ByteWriter, Decode, Digest, Encode, Nonce, Secret, DIGEST_SIZE};
pub use error::{FrameError, InvalidKeyReason, InvalidLogReason, VerifyError};
pub use frame::{FrameHeader, FrameView, Tag};
pub use log::{
    compute_chained_digest, EntryKind, TransportLog, TransportLogDocument, TransportLogEntry,
    VendorQuirk,
};
pub use result_code::result_name;
pub use structs::{AuthInData, AuthOutData, CurrentTicks, SignInfo, TransportPublic};

/// Outcome of verifying a serialized transport log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: bool,
    pub entries: usize,
    pub trans_digest: Digest,
    pub anti_replay: Nonce,
}

/// Verify a transport log against a signing key modulus
pub fn verify_transport_log(log: &TransportLog, modulus: &[u8]) -> Result<VerificationResult, VerifyError> {
    let sign_info = log.sign_info()?;
    let signature = log.signature()?;
    let valid = signature::verify_sha1_rsa(modulus, &signature, &sign_info.to_bytes())?;

    let mut trans_digest = [0u8; DIGEST_SIZE];
    trans_digest.copy_from_slice(&sign_info.data);
    Ok(VerificationResult {
        valid,
        entries: log.len(),
        trans_digest,
        anti_replay: sign_info.replay,
    })
}

/// Verify a JSON log document against a hex-encoded modulus
pub fn verify_transport_log_json(json: &str, modulus_hex: &str) -> Result<VerificationResult, VerifyError> {
    let log = TransportLog::from_json(json)?;
    let modulus = hex::decode(modulus_hex.trim())?;
    verify_transport_log(&log, &modulus)
}
