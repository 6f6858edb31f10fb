//! # Wire Error Types

use thiserror::Error;

/// Errors produced while decoding a stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The stream ended before a value was complete.
    #[error("unexpected end of stream: needed {needed} bytes at offset {offset}, {available} available")]
    UnexpectedEnd {
        /// Offset of the failed read.
        offset: usize,
        /// Bytes the read required.
        needed: usize,
        /// Bytes that were left.
        available: usize,
    },

    /// A small-uint started with a byte the encoding never produces.
    #[error("invalid small-uint lead byte {0:#04x}")]
    InvalidSmallUint(u8),

    /// A string payload was not valid UTF-8.
    #[error("invalid utf-8 string at offset {0}")]
    InvalidString(usize),

    /// A decoded value is out of range for its field.
    #[error("invalid value {value} for {field}")]
    InvalidValue {
        /// Name of the field being decoded.
        field: &'static str,
        /// The offending value.
        value: u64,
    },
}

/// Result type for stream decoding.
pub type WireResult<T> = Result<T, WireError>;
