// SPDX-License-Identifier: MIT OR Apache-2.0

//! Big-endian byte codec for TPM 1.2 structures
//!
//! Writing goes through [`ByteWriter`], a consuming builder. Reading is
//! functional: every reader takes `(buf, offset)` and returns the value
//! together with the offset just past it, so parsers thread offsets
//! explicitly instead of caching them on the value.

use crate::error::FrameError;

/// Size of a SHA-1 digest, nonce or auth secret
pub const DIGEST_SIZE: usize = 20;

/// TPM_DIGEST
pub type Digest = [u8; DIGEST_SIZE];

/// TPM_NONCE
pub type Nonce = [u8; DIGEST_SIZE];

/// TPM_SECRET / TPM_AUTHDATA
pub type Secret = [u8; DIGEST_SIZE];

/// Builder for big-endian serialization
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    data: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(mut self, val: u8) -> Self {
        self.data.push(val);
        self
    }

    pub fn write_bool(self, val: bool) -> Self {
        self.write_u8(val as u8)
    }

    pub fn write_u16(mut self, val: u16) -> Self {
        self.data.extend_from_slice(&val.to_be_bytes());
        self
    }

    pub fn write_u32(mut self, val: u32) -> Self {
        self.data.extend_from_slice(&val.to_be_bytes());
        self
    }

    pub fn write_u64(mut self, val: u64) -> Self {
        self.data.extend_from_slice(&val.to_be_bytes());
        self
    }

    pub fn write_bytes(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// Write a `u32` length prefix followed by the bytes
    pub fn write_sized(self, bytes: &[u8]) -> Self {
        self.write_u32(bytes.len() as u32).write_bytes(bytes)
    }

    pub fn write_struct<E: Encode + ?Sized>(self, value: &E) -> Self {
        value.encode(self)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// A structure with a fixed big-endian wire layout
pub trait Encode {
    fn encode(&self, writer: ByteWriter) -> ByteWriter;

    fn to_bytes(&self) -> Vec<u8> {
        self.encode(ByteWriter::new()).into_vec()
    }
}

/// A structure that can be parsed at an offset, yielding the next offset
pub trait Decode: Sized {
    fn decode_at(buf: &[u8], offset: usize) -> Result<(Self, usize), FrameError>;

    fn from_bytes(buf: &[u8]) -> Result<Self, FrameError> {
        Self::decode_at(buf, 0).map(|(value, _)| value)
    }
}

/// Borrow `len` bytes at `offset`
pub fn read_bytes(buf: &[u8], offset: usize, len: usize) -> Result<(&[u8], usize), FrameError> {
    let end = offset
        .checked_add(len)
        .ok_or(FrameError::Overflow { offset })?;
    if end > buf.len() {
        return Err(FrameError::Truncated {
            offset,
            needed: len,
            available: buf.len().saturating_sub(offset),
        });
    }
    Ok((&buf[offset..end], end))
}

pub fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Result<([u8; N], usize), FrameError> {
    let (bytes, next) = read_bytes(buf, offset, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok((out, next))
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<(u8, usize), FrameError> {
    let ([b], next) = read_array::<1>(buf, offset)?;
    Ok((b, next))
}

pub fn read_bool(buf: &[u8], offset: usize) -> Result<(bool, usize), FrameError> {
    let (b, next) = read_u8(buf, offset)?;
    Ok((b != 0, next))
}

pub fn read_u16(buf: &[u8], offset: usize) -> Result<(u16, usize), FrameError> {
    let (bytes, next) = read_array::<2>(buf, offset)?;
    Ok((u16::from_be_bytes(bytes), next))
}

pub fn read_u32(buf: &[u8], offset: usize) -> Result<(u32, usize), FrameError> {
    let (bytes, next) = read_array::<4>(buf, offset)?;
    Ok((u32::from_be_bytes(bytes), next))
}

pub fn read_u64(buf: &[u8], offset: usize) -> Result<(u64, usize), FrameError> {
    let (bytes, next) = read_array::<8>(buf, offset)?;
    Ok((u64::from_be_bytes(bytes), next))
}

pub fn read_digest(buf: &[u8], offset: usize) -> Result<(Digest, usize), FrameError> {
    read_array::<DIGEST_SIZE>(buf, offset)
}

/// Read a `u32` length prefix and the bytes it covers
pub fn read_sized(buf: &[u8], offset: usize) -> Result<(&[u8], usize), FrameError> {
    let (len, next) = read_u32(buf, offset)?;
    read_bytes(buf, next, len as usize)
}
