//! Requests submitted to the engine and the outcomes delivered back.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies one request and its outcome.
///
/// A request re-delivered with the same correlation id is applied at most
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a new random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The unit of work carried by a [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "items", rename_all = "snake_case")]
pub enum SyncOperation<T> {
    /// Adds one element locally.
    Add(T),
    /// Adds a batch of externally received elements locally.
    Merge(Vec<T>),
    /// Fetches remote state, resolves it against local state, persists and
    /// pushes the result.
    PullAndResolve,
    /// Reads the current elements.
    GetItems,
}

impl<T> SyncOperation<T> {
    /// Returns the operation name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncOperation::Add(_) => "add",
            SyncOperation::Merge(_) => "merge",
            SyncOperation::PullAndResolve => "pull_and_resolve",
            SyncOperation::GetItems => "get_items",
        }
    }

    /// Returns true if the operation contacts the remote.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncOperation::PullAndResolve)
    }
}

/// A caller-supplied unit of work for one set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest<T> {
    /// Set the operation applies to.
    pub set_id: String,
    /// The operation.
    pub operation: SyncOperation<T>,
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
}

impl<T> SyncRequest<T> {
    /// Creates a request with a fresh correlation id.
    pub fn new(set_id: impl Into<String>, operation: SyncOperation<T>) -> Self {
        Self {
            set_id: set_id.into(),
            operation,
            correlation_id: CorrelationId::new(),
        }
    }

    /// Creates an `Add` request.
    pub fn add(set_id: impl Into<String>, item: T) -> Self {
        Self::new(set_id, SyncOperation::Add(item))
    }

    /// Creates a `Merge` request.
    pub fn merge(set_id: impl Into<String>, items: Vec<T>) -> Self {
        Self::new(set_id, SyncOperation::Merge(items))
    }

    /// Creates a `PullAndResolve` request.
    pub fn pull_and_resolve(set_id: impl Into<String>) -> Self {
        Self::new(set_id, SyncOperation::PullAndResolve)
    }

    /// Creates a `GetItems` request.
    pub fn get_items(set_id: impl Into<String>) -> Self {
        Self::new(set_id, SyncOperation::GetItems)
    }

    /// Replaces the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Final status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The request completed.
    Succeeded {
        /// Number of elements in the resulting set.
        item_count: usize,
    },
    /// The request failed.
    Failed {
        /// Failure classification.
        kind: ErrorKind,
    },
}

/// Result delivered for exactly one [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome<T> {
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
    /// Set the request applied to.
    pub set_id: String,
    /// Final status.
    pub status: OutcomeStatus,
    /// Elements of the resulting set. Empty on failure.
    pub items: Vec<T>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
}

impl<T> SyncOutcome<T> {
    /// Creates a successful outcome.
    pub fn succeeded(correlation_id: CorrelationId, set_id: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            correlation_id,
            set_id: set_id.into(),
            status: OutcomeStatus::Succeeded {
                item_count: items.len(),
            },
            items,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a failed outcome.
    pub fn failed(
        correlation_id: CorrelationId,
        set_id: impl Into<String>,
        kind: ErrorKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            set_id: set_id.into(),
            status: OutcomeStatus::Failed { kind },
            items: Vec::new(),
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// Returns true if the request completed.
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded { .. })
    }

    /// Returns the failure kind, if the request failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.status {
            OutcomeStatus::Failed { kind } => Some(kind),
            OutcomeStatus::Succeeded { .. } => None,
        }
    }

    /// Returns the number of elements in the resulting set.
    pub fn item_count(&self) -> usize {
        match self.status {
            OutcomeStatus::Succeeded { item_count } => item_count,
            OutcomeStatus::Failed { .. } => 0,
        }
    }
}
