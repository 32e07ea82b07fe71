// SPDX-License-Identifier: MIT OR Apache-2.0

//! TPM 1.2 command/response framing
//!
//! Every frame is `tag(2) | paramSize(4) | ordinal-or-returnCode(4) | body`,
//! followed by zero, one or two fixed-size authorization trailers. The
//! trailers sit at the end of the frame, so they are located by counting
//! back from `paramSize` rather than by parsing the command-specific body.

use crate::codec::{read_bytes, read_u16, read_u32, ByteWriter};
use crate::error::FrameError;

/// Size of the tag/paramSize/code header
pub const HEADER_SIZE: usize = 10;

/// Offset of the command-specific body
pub const BODY_OFFSET: usize = HEADER_SIZE;

/// Size of a request authorization trailer (TPM_AUTH_IN)
pub const AUTH_IN_SIZE: usize = 45;

/// Size of a response authorization trailer (TPM_AUTH_OUT)
pub const AUTH_OUT_SIZE: usize = 41;

/// Frame tags
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    RquCommand = 0x00C1,
    RquAuth1Command = 0x00C2,
    RquAuth2Command = 0x00C3,
    RspCommand = 0x00C4,
    RspAuth1Command = 0x00C5,
    RspAuth2Command = 0x00C6,
}

impl Tag {
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            0x00C1 => Some(Tag::RquCommand),
            0x00C2 => Some(Tag::RquAuth1Command),
            0x00C3 => Some(Tag::RquAuth2Command),
            0x00C4 => Some(Tag::RspCommand),
            0x00C5 => Some(Tag::RspAuth1Command),
            0x00C6 => Some(Tag::RspAuth2Command),
            _ => None,
        }
    }

    /// Request tag carrying `trailers` authorization blocks
    pub fn request(trailers: usize) -> Option<Self> {
        match trailers {
            0 => Some(Tag::RquCommand),
            1 => Some(Tag::RquAuth1Command),
            2 => Some(Tag::RquAuth2Command),
            _ => None,
        }
    }

    /// Response tag carrying `trailers` authorization blocks
    pub fn response(trailers: usize) -> Option<Self> {
        match trailers {
            0 => Some(Tag::RspCommand),
            1 => Some(Tag::RspAuth1Command),
            2 => Some(Tag::RspAuth2Command),
            _ => None,
        }
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            Tag::RquCommand | Tag::RquAuth1Command | Tag::RquAuth2Command
        )
    }

    pub fn trailer_count(self) -> usize {
        match self {
            Tag::RquCommand | Tag::RspCommand => 0,
            Tag::RquAuth1Command | Tag::RspAuth1Command => 1,
            Tag::RquAuth2Command | Tag::RspAuth2Command => 2,
        }
    }

    /// Size of one trailer in a frame with this tag
    pub fn trailer_size(self) -> usize {
        if self.is_request() {
            AUTH_IN_SIZE
        } else {
            AUTH_OUT_SIZE
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::RquCommand => "TPM_TAG_RQU_COMMAND",
            Tag::RquAuth1Command => "TPM_TAG_RQU_AUTH1_COMMAND",
            Tag::RquAuth2Command => "TPM_TAG_RQU_AUTH2_COMMAND",
            Tag::RspCommand => "TPM_TAG_RSP_COMMAND",
            Tag::RspAuth1Command => "TPM_TAG_RSP_AUTH1_COMMAND",
            Tag::RspAuth2Command => "TPM_TAG_RSP_AUTH2_COMMAND",
        }
    }
}

impl TryFrom<u16> for Tag {
    type Error = FrameError;

    fn try_from(val: u16) -> Result<Self, Self::Error> {
        Self::from_u16(val).ok_or(FrameError::UnknownTag { tag: val })
    }
}

/// Total request size for `data_size` bytes of header and body plus
/// `trailers` request authorization blocks
pub fn compute_total_size(data_size: usize, trailers: usize) -> u32 {
    (data_size + trailers * AUTH_IN_SIZE) as u32
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: Tag,
    pub param_size: u32,
    /// Ordinal for requests, return code for responses
    pub code: u32,
}

/// Serialize a frame; `paramSize` is always the exact output length
pub fn encode(tag: Tag, code: u32, body: &[u8], trailers: &[&[u8]]) -> Result<Vec<u8>, FrameError> {
    if trailers.len() != tag.trailer_count() {
        return Err(FrameError::TrailerCount {
            tag: tag as u16,
            expected: tag.trailer_count(),
            got: trailers.len(),
        });
    }
    if let Some(bad) = trailers.iter().find(|t| t.len() != tag.trailer_size()) {
        return Err(FrameError::TrailerSize {
            expected: tag.trailer_size(),
            got: bad.len(),
        });
    }

    let total = HEADER_SIZE + body.len() + trailers.len() * tag.trailer_size();
    let writer = ByteWriter::with_capacity(total)
        .write_u16(tag as u16)
        .write_u32(total as u32)
        .write_u32(code)
        .write_bytes(body);
    let writer = trailers
        .iter()
        .fold(writer, |writer, trailer| writer.write_bytes(trailer));
    Ok(writer.into_vec())
}

/// Borrowed view of a decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameView<'a> {
    pub header: FrameHeader,
    /// Bytes between the header and the first trailer
    pub body: &'a [u8],
    /// Authorization trailers in wire order
    pub trailers: Vec<&'a [u8]>,
}

impl<'a> FrameView<'a> {
    pub fn tag(&self) -> Tag {
        self.header.tag
    }

    pub fn code(&self) -> u32 {
        self.header.code
    }

    /// Offset of the first trailer (equal to `paramSize` when there are none)
    pub fn trailer_offset(&self) -> usize {
        BODY_OFFSET + self.body.len()
    }
}

/// Parse a frame, locating trailers by counting back from `paramSize`
pub fn decode(bytes: &[u8]) -> Result<FrameView<'_>, FrameError> {
    let (raw_tag, off) = read_u16(bytes, 0)?;
    let tag = Tag::try_from(raw_tag)?;
    let (param_size, off) = read_u32(bytes, off)?;
    let (code, _) = read_u32(bytes, off)?;

    let trailer_len = tag.trailer_count() * tag.trailer_size();
    let minimum = HEADER_SIZE + trailer_len;
    if (param_size as usize) < minimum {
        return Err(FrameError::SizeTooSmall {
            param_size,
            minimum,
        });
    }
    if param_size as usize > bytes.len() {
        return Err(FrameError::SizeExceedsBuffer {
            param_size,
            len: bytes.len(),
        });
    }

    let trailer_start = param_size as usize - trailer_len;
    let (body, _) = read_bytes(bytes, BODY_OFFSET, trailer_start - BODY_OFFSET)?;
    let trailers = (0..tag.trailer_count())
        .map(|i| {
            read_bytes(bytes, trailer_start + i * tag.trailer_size(), tag.trailer_size())
                .map(|(t, _)| t)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FrameView {
        header: FrameHeader {
            tag,
            param_size,
            code,
        },
        body,
        trailers,
    })
}

/// Decode a frame that must be a request
pub fn decode_request(bytes: &[u8]) -> Result<FrameView<'_>, FrameError> {
    let view = decode(bytes)?;
    if !view.tag().is_request() {
        return Err(FrameError::WrongDirection {
            expected: "request",
        });
    }
    Ok(view)
}

/// Decode a frame that must be a response
pub fn decode_response(bytes: &[u8]) -> Result<FrameView<'_>, FrameError> {
    let view = decode(bytes)?;
    if view.tag().is_request() {
        return Err(FrameError::WrongDirection {
            expected: "response",
        });
    }
    Ok(view)
}
