//! Codec error type.

/// Errors produced while encoding or decoding wire data.
///
/// Every variant is fatal for the connection that produced it: framing and
/// decode failures mean the byte stream can no longer be trusted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// Ran out of bytes mid-value.
    #[error("unexpected end of payload")]
    UnexpectedEof,

    /// A ULEB128 prefix did not terminate within 32 bits.
    #[error("varint exceeds 32 bits")]
    VarintOverflow,

    /// A frame declared a payload larger than the configured cap.
    #[error("frame of {len} bytes exceeds cap of {cap}")]
    FrameTooLarge {
        /// Declared payload length.
        len: usize,
        /// Configured maximum.
        cap: usize,
    },

    /// A string payload was not valid UTF-8.
    #[error("invalid utf-8 in string")]
    InvalidUtf8,

    /// A `varchar(N)` exceeded its byte limit.
    #[error("string of {len} bytes exceeds limit of {limit}")]
    StringTooLong {
        /// Actual byte length.
        len: usize,
        /// Maximum allowed.
        limit: usize,
    },

    /// A boolean byte was neither 0 nor 1.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    /// An enum tag outside the known range.
    #[error("unknown {kind} tag {tag}")]
    UnknownTag {
        /// Union the tag belongs to.
        kind: &'static str,
        /// Offending tag byte.
        tag: u8,
    },

    /// A room id failed validation (empty, too long, or bad characters).
    #[error("invalid room id")]
    InvalidRoomId,

    /// A federation packet failed structural validation.
    #[error("malformed federation packet: {0}")]
    MalformedPacket(&'static str),

    /// A federation packet MAC did not verify.
    #[error("federation packet authentication failed")]
    BadPacketMac,
}
