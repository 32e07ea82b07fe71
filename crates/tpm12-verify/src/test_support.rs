// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test support: synthetic transport log builders.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`. Frames built
//! here carry well-formed but meaningless authorization trailers, which is
//! all the log chain needs.

use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha1::Sha1;

use crate::codec::{ByteWriter, Encode, Nonce};
use crate::frame::{encode, Tag, AUTH_IN_SIZE, AUTH_OUT_SIZE};
use crate::log::{
    TransportLog, TransportLogEntry, TPM_ORD_ESTABLISH_TRANSPORT, TPM_ORD_EXECUTE_TRANSPORT,
    TPM_ORD_RELEASE_TRANSPORT_SIGNED,
};
use crate::structs::{CurrentTicks, TransportPublic};

/// TPM_KH_TRANSPORT
const TPM_KH_TRANSPORT: u32 = 0x4000_0003;

const DUMMY_AUTH_IN: [u8; AUTH_IN_SIZE] = [0xA5; AUTH_IN_SIZE];
const DUMMY_AUTH_OUT: [u8; AUTH_OUT_SIZE] = [0x5A; AUTH_OUT_SIZE];

// ============================================================================
// Frame builders
// ============================================================================

/// Plain frame with the given body
pub fn plain_frame(tag: Tag, code: u32, body: &[u8]) -> Vec<u8> {
    encode(tag, code, body, &[]).expect("plain frame")
}

/// Unauthorized TPM_EstablishTransport under TPM_KH_TRANSPORT
pub fn establish_command(public: &TransportPublic, secret: &[u8]) -> Vec<u8> {
    let body = ByteWriter::new()
        .write_u32(TPM_KH_TRANSPORT)
        .write_struct(public)
        .write_sized(secret)
        .into_vec();
    plain_frame(Tag::RquCommand, TPM_ORD_ESTABLISH_TRANSPORT, &body)
}

pub fn establish_response(handle: u32, locality: u32, ticks: &CurrentTicks, nonce: &Nonce) -> Vec<u8> {
    let body = ByteWriter::new()
        .write_u32(handle)
        .write_u32(locality)
        .write_struct(ticks)
        .write_bytes(nonce)
        .into_vec();
    plain_frame(Tag::RspCommand, 0, &body)
}

/// Log entry for an ExecuteTransport carrying `inner_cmd` / `inner_rsp`
pub fn execute_entry(inner_cmd: Vec<u8>, inner_rsp: Vec<u8>, ticks: u64, locality: u32) -> TransportLogEntry {
    let cmd_body = ByteWriter::new().write_sized(&inner_cmd).into_vec();
    let wrap_cmd = encode(
        Tag::RquAuth1Command,
        TPM_ORD_EXECUTE_TRANSPORT,
        &cmd_body,
        &[&DUMMY_AUTH_IN],
    )
    .expect("execute command");
    let rsp_body = ByteWriter::new()
        .write_u64(ticks)
        .write_u32(locality)
        .write_sized(&inner_rsp)
        .into_vec();
    let wrap_out = encode(Tag::RspAuth1Command, 0, &rsp_body, &[&DUMMY_AUTH_OUT]).expect("execute response");
    TransportLogEntry::execute(inner_cmd, wrap_cmd, wrap_out, inner_rsp)
}

pub fn release_command(key_handle: u32, anti_replay: &Nonce) -> Vec<u8> {
    let body = ByteWriter::new()
        .write_u32(key_handle)
        .write_bytes(anti_replay)
        .into_vec();
    encode(
        Tag::RquAuth2Command,
        TPM_ORD_RELEASE_TRANSPORT_SIGNED,
        &body,
        &[&DUMMY_AUTH_IN, &DUMMY_AUTH_IN],
    )
    .expect("release command")
}

pub fn release_response(locality: u32, ticks: &CurrentTicks, signature: &[u8]) -> Vec<u8> {
    let body = ByteWriter::new()
        .write_u32(locality)
        .write_struct(ticks)
        .write_sized(signature)
        .into_vec();
    encode(Tag::RspAuth2Command, 0, &body, &[&DUMMY_AUTH_OUT, &DUMMY_AUTH_OUT]).expect("release response")
}

// ============================================================================
// Whole-session builder
// ============================================================================

/// Builds a transport log the way a TPM would produce it, then signs it
pub struct SyntheticSession {
    pub log: TransportLog,
    pub start_ticks: CurrentTicks,
    next_tick: u64,
}

impl SyntheticSession {
    /// Session opened with an unencrypted, logged transport
    pub fn establish(manufacturer: u32) -> Self {
        let start_ticks = CurrentTicks {
            current_ticks: 1000,
            tick_rate: 1,
            tick_nonce: [0x7C; 20],
        };
        let mut log = TransportLog::new(manufacturer);
        log.push(TransportLogEntry::establish(
            establish_command(&TransportPublic::default(), &[0x42; 20]),
            establish_response(0x0200_0000, 0, &start_ticks, &[0x31; 20]),
        ));
        Self {
            log,
            start_ticks,
            next_tick: 1001,
        }
    }

    /// Record a wrapped plain command answered with a plain response
    pub fn wrap(&mut self, ordinal: u32, params: &[u8], out_params: &[u8]) -> &mut Self {
        let inner_cmd = plain_frame(Tag::RquCommand, ordinal, params);
        let inner_rsp = plain_frame(Tag::RspCommand, 0, out_params);
        let ticks = self.next_tick;
        self.next_tick += 1;
        self.log.push(execute_entry(inner_cmd, inner_rsp, ticks, 0));
        self
    }

    /// Release with `key`, signing the resulting TPM_SIGN_INFO
    pub fn release_signed(mut self, key: &RsaPrivateKey, anti_replay: &Nonce) -> TransportLog {
        let ticks = self.start_ticks.at(self.next_tick);
        let placeholder = vec![0u8; key.size()];
        self.log.push(TransportLogEntry::release(
            release_command(0x0100_0000, anti_replay),
            release_response(0, &ticks, &placeholder),
        ));

        let sign_info = self.log.sign_info().expect("sign info");
        let signature = sign(key, &sign_info.to_bytes());

        let mut entries = self.log.entries().to_vec();
        entries.pop();
        let mut log = TransportLog::with_quirk(self.log.manufacturer(), self.log.quirk());
        for entry in entries {
            log.push(entry);
        }
        log.push(TransportLogEntry::release(
            release_command(0x0100_0000, anti_replay),
            release_response(0, &ticks, &signature),
        ));
        log
    }
}

/// PKCS#1 v1.5 / SHA-1 signature
pub fn sign(key: &RsaPrivateKey, message: &[u8]) -> Vec<u8> {
    SigningKey::<Sha1>::new(key.clone()).sign(message).to_vec()
}

pub fn modulus(key: &RsaPrivateKey) -> Vec<u8> {
    key.to_public_key().n().to_bytes_be()
}

/// Small RSA key for tests
pub fn test_key() -> RsaPrivateKey {
    let mut rng = rand::thread_rng();
    RsaPrivateKey::new(&mut rng, 1024).expect("RSA key generation")
}
