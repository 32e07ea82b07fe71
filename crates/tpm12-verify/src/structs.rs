// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-layout TPM 1.2 structures used by authorization and transport

use crate::codec::{
    read_array, read_bool, read_digest, read_u16, read_u32, read_u64, ByteWriter, Decode, Digest,
    Encode, Nonce, DIGEST_SIZE,
};
use crate::error::FrameError;
use crate::frame::{AUTH_IN_SIZE, AUTH_OUT_SIZE};

/// TPM_TAG_TRANSPORT_PUBLIC
pub const TAG_TRANSPORT_PUBLIC: u16 = 0x001E;
/// TPM_TAG_TRANSPORT_LOG_IN
pub const TAG_TRANSPORT_LOG_IN: u16 = 0x0010;
/// TPM_TAG_TRANSPORT_LOG_OUT
pub const TAG_TRANSPORT_LOG_OUT: u16 = 0x0011;
/// TPM_TAG_CURRENT_TICKS
pub const TAG_CURRENT_TICKS: u16 = 0x0014;
/// TPM_TAG_SIGNINFO
pub const TAG_SIGNINFO: u16 = 0x0005;

/// TPM_TRANSPORT_ENCRYPT
pub const TPM_TRANSPORT_ENCRYPT: u32 = 0x0000_0001;
/// TPM_TRANSPORT_LOG
pub const TPM_TRANSPORT_LOG: u32 = 0x0000_0002;
/// TPM_TRANSPORT_EXCLUSIVE
pub const TPM_TRANSPORT_EXCLUSIVE: u32 = 0x0000_0004;

/// TPM_ALG_MGF1
pub const TPM_ALG_MGF1: u32 = 0x0000_0007;
/// TPM_ES_NONE
pub const TPM_ES_NONE: u16 = 0x0001;

/// Fixed field of a transport TPM_SIGN_INFO
pub const SIGN_INFO_FIXED_TRAN: [u8; 4] = *b"TRAN";

fn expect_tag(buf: &[u8], offset: usize, expected: u16) -> Result<usize, FrameError> {
    let (got, next) = read_u16(buf, offset)?;
    if got != expected {
        return Err(FrameError::StructureTag { expected, got });
    }
    Ok(next)
}

/// TPM_AUTH_IN trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthInData {
    pub auth_handle: u32,
    pub nonce_odd: Nonce,
    pub continue_session: bool,
    pub in_auth: Digest,
}

impl AuthInData {
    pub fn to_array(&self) -> [u8; AUTH_IN_SIZE] {
        let mut out = [0u8; AUTH_IN_SIZE];
        out.copy_from_slice(&self.to_bytes());
        out
    }
}

impl Encode for AuthInData {
    fn encode(&self, writer: ByteWriter) -> ByteWriter {
        writer
            .write_u32(self.auth_handle)
            .write_bytes(&self.nonce_odd)
            .write_bool(self.continue_session)
            .write_bytes(&self.in_auth)
    }
}

impl Decode for AuthInData {
    fn decode_at(buf: &[u8], offset: usize) -> Result<(Self, usize), FrameError> {
        let (auth_handle, off) = read_u32(buf, offset)?;
        let (nonce_odd, off) = read_digest(buf, off)?;
        let (continue_session, off) = read_bool(buf, off)?;
        let (in_auth, off) = read_digest(buf, off)?;
        Ok((
            Self {
                auth_handle,
                nonce_odd,
                continue_session,
                in_auth,
            },
            off,
        ))
    }
}

/// TPM_AUTH_OUT trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthOutData {
    pub nonce_even: Nonce,
    pub continue_session: bool,
    pub res_auth: Digest,
}

impl AuthOutData {
    pub fn to_array(&self) -> [u8; AUTH_OUT_SIZE] {
        let mut out = [0u8; AUTH_OUT_SIZE];
        out.copy_from_slice(&self.to_bytes());
        out
    }
}

impl Encode for AuthOutData {
    fn encode(&self, writer: ByteWriter) -> ByteWriter {
        writer
            .write_bytes(&self.nonce_even)
            .write_bool(self.continue_session)
            .write_bytes(&self.res_auth)
    }
}

impl Decode for AuthOutData {
    fn decode_at(buf: &[u8], offset: usize) -> Result<(Self, usize), FrameError> {
        let (nonce_even, off) = read_digest(buf, offset)?;
        let (continue_session, off) = read_bool(buf, off)?;
        let (res_auth, off) = read_digest(buf, off)?;
        Ok((
            Self {
                nonce_even,
                continue_session,
                res_auth,
            },
            off,
        ))
    }
}

/// TPM_TRANSPORT_PUBLIC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPublic {
    pub trans_attributes: u32,
    pub alg_id: u32,
    pub enc_scheme: u16,
}

impl TransportPublic {
    pub const SIZE: usize = 12;

    pub fn is_encrypted(&self) -> bool {
        self.trans_attributes & TPM_TRANSPORT_ENCRYPT != 0
    }

    pub fn is_logged(&self) -> bool {
        self.trans_attributes & TPM_TRANSPORT_LOG != 0
    }

    pub fn is_exclusive(&self) -> bool {
        self.trans_attributes & TPM_TRANSPORT_EXCLUSIVE != 0
    }
}

impl Default for TransportPublic {
    fn default() -> Self {
        Self {
            trans_attributes: TPM_TRANSPORT_LOG,
            alg_id: TPM_ALG_MGF1,
            enc_scheme: TPM_ES_NONE,
        }
    }
}

impl Encode for TransportPublic {
    fn encode(&self, writer: ByteWriter) -> ByteWriter {
        writer
            .write_u16(TAG_TRANSPORT_PUBLIC)
            .write_u32(self.trans_attributes)
            .write_u32(self.alg_id)
            .write_u16(self.enc_scheme)
    }
}

impl Decode for TransportPublic {
    fn decode_at(buf: &[u8], offset: usize) -> Result<(Self, usize), FrameError> {
        let off = expect_tag(buf, offset, TAG_TRANSPORT_PUBLIC)?;
        let (trans_attributes, off) = read_u32(buf, off)?;
        let (alg_id, off) = read_u32(buf, off)?;
        let (enc_scheme, off) = read_u16(buf, off)?;
        Ok((
            Self {
                trans_attributes,
                alg_id,
                enc_scheme,
            },
            off,
        ))
    }
}

/// TPM_CURRENT_TICKS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentTicks {
    pub current_ticks: u64,
    pub tick_rate: u16,
    pub tick_nonce: Nonce,
}

impl CurrentTicks {
    pub const SIZE: usize = 32;

    /// Same tick session, later tick count
    pub fn at(&self, current_ticks: u64) -> Self {
        Self {
            current_ticks,
            ..*self
        }
    }
}

impl Encode for CurrentTicks {
    fn encode(&self, writer: ByteWriter) -> ByteWriter {
        writer
            .write_u16(TAG_CURRENT_TICKS)
            .write_u64(self.current_ticks)
            .write_u16(self.tick_rate)
            .write_bytes(&self.tick_nonce)
    }
}

impl Decode for CurrentTicks {
    fn decode_at(buf: &[u8], offset: usize) -> Result<(Self, usize), FrameError> {
        let off = expect_tag(buf, offset, TAG_CURRENT_TICKS)?;
        let (current_ticks, off) = read_u64(buf, off)?;
        let (tick_rate, off) = read_u16(buf, off)?;
        let (tick_nonce, off) = read_digest(buf, off)?;
        Ok((
            Self {
                current_ticks,
                tick_rate,
                tick_nonce,
            },
            off,
        ))
    }
}

/// TPM_TRANSPORT_LOG_IN
///
/// `pub_key_hash` of `None` serializes as zero bytes, which some chips
/// expect when the wrapped command uses no keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLogIn {
    pub parameters: Digest,
    pub pub_key_hash: Option<Digest>,
}

impl Encode for TransportLogIn {
    fn encode(&self, writer: ByteWriter) -> ByteWriter {
        let writer = writer
            .write_u16(TAG_TRANSPORT_LOG_IN)
            .write_bytes(&self.parameters);
        match &self.pub_key_hash {
            Some(hash) => writer.write_bytes(hash),
            None => writer,
        }
    }
}

/// TPM_TRANSPORT_LOG_OUT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLogOut {
    pub current_ticks: CurrentTicks,
    pub parameters: Digest,
    pub locality: u32,
}

impl Encode for TransportLogOut {
    fn encode(&self, writer: ByteWriter) -> ByteWriter {
        writer
            .write_u16(TAG_TRANSPORT_LOG_OUT)
            .write_struct(&self.current_ticks)
            .write_bytes(&self.parameters)
            .write_u32(self.locality)
    }
}

/// TPM_SIGN_INFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInfo {
    pub fixed: [u8; 4],
    pub replay: Nonce,
    pub data: Vec<u8>,
}

impl SignInfo {
    /// Sign info covering a transport session digest
    pub fn transport(replay: Nonce, trans_digest: Digest) -> Self {
        Self {
            fixed: SIGN_INFO_FIXED_TRAN,
            replay,
            data: trans_digest.to_vec(),
        }
    }
}

impl Encode for SignInfo {
    fn encode(&self, writer: ByteWriter) -> ByteWriter {
        writer
            .write_u16(TAG_SIGNINFO)
            .write_bytes(&self.fixed)
            .write_bytes(&self.replay)
            .write_sized(&self.data)
    }
}

impl Decode for SignInfo {
    fn decode_at(buf: &[u8], offset: usize) -> Result<(Self, usize), FrameError> {
        let off = expect_tag(buf, offset, TAG_SIGNINFO)?;
        let (fixed, off) = read_array::<4>(buf, off)?;
        let (replay, off) = read_array::<DIGEST_SIZE>(buf, off)?;
        let (data, off) = crate::codec::read_sized(buf, off)?;
        Ok((
            Self {
                fixed,
                replay,
                data: data.to_vec(),
            },
            off,
        ))
    }
}
