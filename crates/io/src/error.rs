//! Error types for the binary encoding helpers.

use thiserror::Error;

/// Errors raised while reading or writing the persisted state layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// Attempted to read past the end of the buffer.
    #[error("unexpected end of stream: wanted {wanted} bytes, {available} available")]
    EndOfStream { wanted: usize, available: usize },

    /// A length prefix did not correspond to valid UTF-8 (for string fields).
    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    /// A length-prefixed field declared a size larger than the configured cap.
    #[error("{field} length {len} exceeds maximum {max}")]
    LengthExceeded {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

pub type Result<T> = std::result::Result<T, IoError>;
