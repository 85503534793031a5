//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while decoding a TDS response stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The buffer ended in the middle of a token.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// A length-prefixed structure claims more bytes than are available.
    #[error("incomplete data: expected {expected} bytes, {actual} available")]
    IncompletePacket {
        /// Bytes required by the length prefix.
        expected: usize,
        /// Bytes actually remaining.
        actual: usize,
    },

    /// Unknown token type byte.
    #[error("invalid token type: 0x{0:02X}")]
    InvalidTokenType(u8),

    /// A field carried a value outside its domain.
    #[error("invalid value {value} for field `{field}`")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending raw value.
        value: u32,
    },

    /// UTF-16 or other string decoding failed.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// A ROW/NBCROW token arrived before any COLMETADATA.
    #[error("row token received without column metadata")]
    MissingColumnMetadata,

    /// A position marker does not point into the current response.
    #[error("position marker {position} is outside the response ({len} bytes)")]
    InvalidMark {
        /// Marker offset.
        position: usize,
        /// Response length.
        len: usize,
    },

    /// The token at a marker is not the token the caller expected.
    #[error("expected {expected} token at offset {position}, found 0x{found:02X}")]
    UnexpectedToken {
        /// Name of the expected token.
        expected: &'static str,
        /// Offset of the token.
        position: usize,
        /// Token type byte found.
        found: u8,
    },
}
