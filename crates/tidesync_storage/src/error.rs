//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to truncate beyond the end of storage.
    #[error("cannot truncate to {requested} bytes, storage holds {size}")]
    TruncatePastEnd {
        /// The requested size.
        requested: u64,
        /// The current storage size.
        size: u64,
    },

    /// The storage contents are not what the reader expected.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the log file.
    #[error("storage locked: {path}")]
    Locked {
        /// Path of the locked file.
        path: String,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
