//! Error types for protocol operations.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while manipulating replicated state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Two sets with different ids were combined.
    #[error("set id mismatch: expected {expected:?}, got {actual:?}")]
    IdMismatch {
        /// Id of the receiving set.
        expected: String,
        /// Id of the other set.
        actual: String,
    },

    /// A resolution strategy name was not recognised.
    #[error("unsupported resolution strategy: {0:?}")]
    UnsupportedStrategy(String),

    /// Snapshot encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl ProtocolError {
    /// Returns true if this error stems from static configuration.
    ///
    /// Configuration errors cannot be fixed by retrying.
    pub fn is_config_error(&self) -> bool {
        matches!(self, ProtocolError::UnsupportedStrategy(_))
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Codec(err.to_string())
    }
}
