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

    /// A stored snapshot could not be encoded or decoded.
    #[error("snapshot codec error: {0}")]
    Codec(String),

    /// The set id cannot be used as a storage key.
    #[error("invalid set id: {0:?}")]
    InvalidSetId(String),

    /// The snapshot id does not match the key it is saved under.
    #[error("snapshot id {snapshot_id:?} does not match key {key:?}")]
    IdMismatch {
        /// Key used for the save.
        key: String,
        /// Id carried by the snapshot.
        snapshot_id: String,
    },

    /// The store cannot currently be used.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Creates a codec error from any displayable error.
    pub fn codec(err: impl std::fmt::Display) -> Self {
        StorageError::Codec(err.to_string())
    }
}
