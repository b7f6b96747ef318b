//! ULEB128 length-prefixed framing.
//!
//! A frame on the wire is a ULEB128 byte length followed by exactly that
//! many payload bytes. The decoder rejects length prefixes that exceed 32
//! bits and payloads larger than the configured cap; both are fatal for the
//! connection because the stream can no longer be resynchronized.

use bytes::{Buf, Bytes, BytesMut};

use crate::{error::CodecError, wire::WireWriter};

/// Default payload cap: 2 MiB.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Stateless frame splitter/assembler with a configurable payload cap.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    cap: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self { cap: MAX_FRAME_LEN }
    }
}

impl FrameCodec {
    /// Codec with the default 2 MiB cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with a custom payload cap.
    pub fn with_cap(cap: usize) -> Self {
        Self { cap }
    }

    /// Prefix `payload` with its ULEB128 length, yielding one write-ready
    /// buffer.
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.uleb(payload.len() as u32);
        w.raw(payload);
        w.into_bytes()
    }

    /// Try to peel one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On success the length
    /// prefix and payload are consumed from `buf`. Errors are fatal framing
    /// errors; the buffer is left untouched and the connection should be
    /// closed.
    pub fn try_decode(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
        let mut len: u32 = 0;
        let mut shift = 0u32;
        let mut prefix = 0usize;
        loop {
            let Some(&byte) = buf.get(prefix) else {
                // Prefix itself incomplete. A prefix longer than 5 bytes can
                // never terminate within 32 bits.
                if prefix >= 5 {
                    return Err(CodecError::VarintOverflow);
                }
                return Ok(None);
            };
            prefix += 1;
            let bits = u32::from(byte & 0x7f);
            if shift >= 32 || (shift == 28 && bits > 0x0f) {
                return Err(CodecError::VarintOverflow);
            }
            len |= bits << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        let len = len as usize;
        if len > self.cap {
            return Err(CodecError::FrameTooLarge { len, cap: self.cap });
        }
        if buf.len() < prefix + len {
            return Ok(None);
        }
        buf.advance(prefix);
        Ok(Some(buf.split_to(len).freeze()))
    }
}
