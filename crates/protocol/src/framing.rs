//! Length-prefixed frame codec with optional LZ4 compression.
//!
//! # Frame Format
//!
//! ```text
//! +--------+----------------+-------+-------------------+
//! | "WRDN" | len (u32, BE)  | flags | payload (len - 1) |
//! +--------+----------------+-------+-------------------+
//! ```
//!
//! `len` counts the flags byte plus the payload. Bit 0 of `flags` marks an
//! LZ4 payload (size-prepended block). Payloads over
//! [`COMPRESSION_THRESHOLD`] bytes are compressed when that makes them smaller.

use crate::error::{ProtocolError, Result};

/// Magic bytes opening every Warden frame.
pub const FRAME_MAGIC: [u8; 4] = *b"WRDN";

/// Payloads strictly larger than this are candidates for compression.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Maximum encoded frame size (16 MiB), header included.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Magic + length + flags.
pub const FRAME_HEADER_SIZE: usize = 9;

const PREFIX_SIZE: usize = 8;

/// Per-frame flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Payload is LZ4 compressed.
    pub const COMPRESSED: u8 = 0b0000_0001;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    /// Return a copy with the compressed bit set or cleared.
    pub fn with_compressed(self, compressed: bool) -> Self {
        if compressed {
            Self(self.0 | Self::COMPRESSED)
        } else {
            Self(self.0 & !Self::COMPRESSED)
        }
    }
}

/// A decoded frame. `payload` is always the uncompressed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: FrameFlags,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            flags: FrameFlags::new(),
            payload,
        }
    }
}

/// Encoder and decoder for [`Frame`]s.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    compression_enabled: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Codec that compresses large payloads.
    pub fn new() -> Self {
        Self {
            compression_enabled: true,
        }
    }

    /// Codec that never compresses (it still decodes compressed frames).
    pub fn without_compression() -> Self {
        Self {
            compression_enabled: false,
        }
    }

    /// Encode a frame into its wire bytes.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let payload = &frame.payload;

        if payload.len() > MAX_FRAME_SIZE - FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len() + FRAME_HEADER_SIZE,
                max: MAX_FRAME_SIZE,
            });
        }

        let compressed = if self.compression_enabled && payload.len() > COMPRESSION_THRESHOLD {
            Some(lz4_flex::compress_prepend_size(payload)).filter(|c| c.len() < payload.len())
        } else {
            None
        };

        let (body, flags): (&[u8], FrameFlags) = match compressed.as_deref() {
            Some(c) => (c, frame.flags.with_compressed(true)),
            None => (payload, frame.flags.with_compressed(false)),
        };

        let content_len = 1 + body.len();
        let mut output = Vec::with_capacity(PREFIX_SIZE + content_len);
        output.extend_from_slice(&FRAME_MAGIC);
        output.extend_from_slice(&(content_len as u32).to_be_bytes());
        output.push(flags.as_byte());
        output.extend_from_slice(body);

        Ok(output)
    }

    /// Decode one complete frame from the front of `data`.
    ///
    /// Returns the frame and the number of bytes consumed. Fails if `data`
    /// does not hold a whole frame; use [`FrameCodec::try_decode`] when
    /// reading from a stream.
    pub fn decode(&self, data: &[u8]) -> Result<(Frame, usize)> {
        match self.try_decode(data)? {
            Some(decoded) => Ok(decoded),
            None => Err(ProtocolError::Deserialization(format!(
                "insufficient data for frame: have {} bytes",
                data.len()
            ))),
        }
    }

    /// Decode a frame if `data` holds a complete one, `Ok(None)` otherwise.
    ///
    /// A bad magic or an oversized length is reported as soon as the header
    /// is visible, without waiting for the payload.
    pub fn try_decode(&self, data: &[u8]) -> Result<Option<(Frame, usize)>> {
        let Some(content_len) = parse_header(data)? else {
            return Ok(None);
        };

        let total = PREFIX_SIZE + content_len;
        if data.len() < total {
            return Ok(None);
        }

        let flags = FrameFlags::from_byte(data[PREFIX_SIZE]);
        let body = &data[FRAME_HEADER_SIZE..total];

        let payload = if flags.is_compressed() {
            decompress(body)?
        } else {
            body.to_vec()
        };

        let frame = Frame {
            flags: flags.with_compressed(false),
            payload,
        };
        Ok(Some((frame, total)))
    }
}

/// Inflate a size-prepended LZ4 block.
///
/// The announced size is checked against the same bound `encode` applies to
/// payloads before any output buffer is allocated.
fn decompress(body: &[u8]) -> Result<Vec<u8>> {
    let Some((size, block)) = body.split_first_chunk::<4>() else {
        return Err(ProtocolError::Deserialization(
            "failed to decompress payload: missing size prefix".to_string(),
        ));
    };

    let size = u32::from_le_bytes(*size) as usize;
    if size > MAX_FRAME_SIZE - FRAME_HEADER_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: size + FRAME_HEADER_SIZE,
            max: MAX_FRAME_SIZE,
        });
    }

    lz4_flex::block::decompress(block, size)
        .map_err(|e| ProtocolError::Deserialization(format!("failed to decompress payload: {e}")))
}

/// Validate the fixed header and return the content length, or `None` when
/// fewer than [`FRAME_HEADER_SIZE`] bytes are available.
fn parse_header(data: &[u8]) -> Result<Option<usize>> {
    if data.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let magic = [data[0], data[1], data[2], data[3]];
    if magic != FRAME_MAGIC {
        return Err(ProtocolError::InvalidFrameMagic {
            expected: u32::from_be_bytes(FRAME_MAGIC),
            got: u32::from_be_bytes(magic),
        });
    }

    let content_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
    if PREFIX_SIZE + content_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: PREFIX_SIZE + content_len,
            max: MAX_FRAME_SIZE,
        });
    }
    if content_len == 0 {
        return Err(ProtocolError::Deserialization(
            "invalid frame: missing flags byte".to_string(),
        ));
    }

    Ok(Some(content_len))
}
