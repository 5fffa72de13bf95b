//! Error types for the sync engine.

use replisync_storage::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Classification of a failed sync cycle, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The store or the transport could not be reached.
    Connection,
    /// Local or remote state could not be read.
    Fetch,
    /// The configuration is invalid. Never retried.
    Config,
    /// The resolved state could not be written locally.
    Persist,
    /// The resolved state could not be sent upstream.
    Push,
    /// The request was cancelled before persisting.
    Cancelled,
}

impl ErrorKind {
    /// Returns the snake_case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Config => "config",
            ErrorKind::Persist => "persist",
            ErrorKind::Push => "push",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a [`TransportGateway`](crate::TransportGateway).
///
/// Network failures and 5xx responses are retryable; malformed payloads and
/// other rejections are not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Error message.
    pub message: String,
    /// Whether the operation can be retried.
    pub retryable: bool,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
}

impl TransportError {
    /// Creates a retryable transport error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            status: None,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            status: None,
        }
    }

    /// Creates an error from an unexpected HTTP status.
    ///
    /// 5xx statuses are retryable.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: format!("HTTP {}: {}", status, message.into()),
            retryable: status >= 500,
            status: Some(status),
        }
    }
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The store could not be opened or the transport could not connect.
    #[error("connection failed: {message}")]
    Connection {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Loading local state or fetching remote state failed.
    #[error("fetch failed: {message}")]
    Fetch {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Writing the resolved state failed.
    #[error("persist failed: {0}")]
    Persist(#[source] StorageError),

    /// Pushing the resolved state failed.
    #[error("push failed: {0}")]
    Push(#[source] TransportError),

    /// The request was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The request queue is at capacity.
    #[error("request queue is full")]
    QueueFull,

    /// The channel has shut down.
    #[error("sync channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Creates a connection error from a storage failure.
    pub fn connection_storage(err: &StorageError) -> Self {
        Self::Connection {
            message: format!("store: {}", err),
            retryable: storage_retryable(err),
        }
    }

    /// Creates a connection error from a transport failure.
    pub fn connection_transport(err: &TransportError) -> Self {
        Self::Connection {
            message: format!("transport: {}", err),
            retryable: err.retryable,
        }
    }

    /// Creates a fetch error from a local load failure.
    pub fn fetch_storage(err: &StorageError) -> Self {
        Self::Fetch {
            message: format!("local load: {}", err),
            retryable: storage_retryable(err),
        }
    }

    /// Creates a fetch error from a remote fetch failure.
    pub fn fetch_transport(err: &TransportError) -> Self {
        Self::Fetch {
            message: format!("remote fetch: {}", err),
            retryable: err.retryable,
        }
    }

    /// Returns the public classification of this error.
    ///
    /// Channel errors never reach an outcome; they map to
    /// [`ErrorKind::Connection`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Connection { .. } => ErrorKind::Connection,
            SyncError::Fetch { .. } => ErrorKind::Fetch,
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::Persist(_) => ErrorKind::Persist,
            SyncError::Push(_) => ErrorKind::Push,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::QueueFull | SyncError::ChannelClosed => ErrorKind::Connection,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Connection { retryable, .. } => *retryable,
            SyncError::Fetch { retryable, .. } => *retryable,
            SyncError::Persist(err) => storage_retryable(err),
            SyncError::Push(err) => err.retryable,
            SyncError::Config(_)
            | SyncError::Cancelled
            | SyncError::QueueFull
            | SyncError::ChannelClosed => false,
        }
    }
}

fn storage_retryable(err: &StorageError) -> bool {
    matches!(err, StorageError::Io(_) | StorageError::Unavailable(_))
}
