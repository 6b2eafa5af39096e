//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a frame body.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The frame header is missing or malformed.
    #[error("invalid frame: {message}")]
    InvalidFrame {
        /// Description of the framing error.
        message: String,
    },

    /// The frame was written with a version this build does not read.
    #[error("unsupported frame version {version}")]
    UnsupportedVersion {
        /// Version byte found in the frame.
        version: u8,
    },

    /// The frame names a format this build does not know.
    #[error("unsupported payload format {code}")]
    UnsupportedFormat {
        /// Format byte found in the frame.
        code: u8,
    },

    /// A configured format name is not recognised.
    #[error("unknown payload format name '{name}'")]
    UnknownFormatName {
        /// The rejected name.
        name: String,
    },

    /// Bytes remain after the body was fully decoded.
    #[error("{count} trailing bytes after payload")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }
}
