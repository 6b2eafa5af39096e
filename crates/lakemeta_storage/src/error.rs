//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// A missing key is not an error; every variant here means the backend
/// could not serve the request.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The on-disk data is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The backend has been closed.
    #[error("storage is closed")]
    Closed,

    /// Another process holds the backend's directory lock.
    #[error("storage locked: another process has exclusive access to {path}")]
    Locked {
        /// Directory that is locked.
        path: String,
    },

    /// No backend is registered under the requested name.
    #[error("unknown storage backend: {name}")]
    UnknownBackend {
        /// The requested backend name.
        name: String,
    },

    /// The backend options are incomplete or inconsistent.
    #[error("invalid storage options: {0}")]
    InvalidOptions(String),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
