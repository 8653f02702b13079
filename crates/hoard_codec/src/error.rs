//! Error types for the codec crate.

use thiserror::Error;

/// Result type for marshalling operations.
pub type MarshalResult<T> = Result<T, MarshalError>;

/// Errors raised while turning values into bytes or back.
///
/// These are format errors only. I/O failures belong to the storage layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    Encode {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a byte payload.
    #[error("decoding failed: {message}")]
    Decode {
        /// Description of the decoding error.
        message: String,
    },

    /// A fixed-width payload had the wrong length.
    #[error("unexpected payload length: expected {expected} bytes, got {actual}")]
    UnexpectedLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// A text payload was not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
}

impl MarshalError {
    /// Create an encoding error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create a decoding error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}
