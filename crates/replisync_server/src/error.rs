//! Error types for the sync server.

use replisync_storage::StorageError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown route or method.
    #[error("no route for {method} {path}")]
    NotFound {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// Pushed snapshot exceeds the configured size.
    #[error("snapshot too large: {items} items, limit {limit}")]
    TooLarge {
        /// Elements in the pushed snapshot.
        items: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        match self {
            ServerError::Storage(err) => !matches!(
                err,
                StorageError::InvalidSetId(_) | StorageError::IdMismatch { .. }
            ),
            _ => false,
        }
    }

    /// Returns the HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotFound { .. } => 404,
            ServerError::TooLarge { .. } => 413,
            ServerError::Storage(StorageError::Unavailable(_)) => 503,
            ServerError::Storage(_) if self.is_client_error() => 400,
            ServerError::Storage(_) => 500,
        }
    }
}
