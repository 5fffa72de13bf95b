//! Conflict resolution between local and remote state.

use crate::error::{ProtocolError, ProtocolResult};
use crate::set::ReplicatedSet;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Field added to structured records resolved with [`ResolutionStrategy::Merge`].
pub const RESOLVED_AT_FIELD: &str = "resolvedAt";

/// A structured record: a flat JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Policy for reconciling local state with remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Local state wins, remote state is discarded.
    ClientWins,
    /// Remote state wins, local state is discarded.
    ServerWins,
    /// Local and remote state are combined.
    Merge,
}

impl ResolutionStrategy {
    /// Returns the canonical configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::ClientWins => "client-wins",
            ResolutionStrategy::ServerWins => "server-wins",
            ResolutionStrategy::Merge => "merge",
        }
    }

    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ResolutionStrategy::ClientWins => 1,
            ResolutionStrategy::ServerWins => 2,
            ResolutionStrategy::Merge => 3,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ResolutionStrategy::ClientWins),
            2 => Some(ResolutionStrategy::ServerWins),
            3 => Some(ResolutionStrategy::Merge),
            _ => None,
        }
    }
}

impl Default for ResolutionStrategy {
    fn default() -> Self {
        ResolutionStrategy::Merge
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "client-wins" => Ok(ResolutionStrategy::ClientWins),
            "server-wins" => Ok(ResolutionStrategy::ServerWins),
            "merge" => Ok(ResolutionStrategy::Merge),
            _ => Err(ProtocolError::UnsupportedStrategy(s.to_string())),
        }
    }
}

/// Inputs to a resolution that are not part of either state.
///
/// Carrying the timestamp in explicitly keeps resolution a pure function:
/// the same context and inputs always produce the same result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionContext {
    /// Time stamped onto merged records.
    pub resolved_at: DateTime<Utc>,
}

impl ResolutionContext {
    /// Creates a context with a fixed resolution time.
    pub fn at(resolved_at: DateTime<Utc>) -> Self {
        Self { resolved_at }
    }

    /// Creates a context stamped with the current time.
    pub fn now() -> Self {
        Self::at(Utc::now())
    }
}

/// State that knows how to combine itself with a remote counterpart.
pub trait Resolvable: Clone {
    /// Combines `self` (local) with `remote` under the `Merge` strategy.
    fn merge_resolved(&self, remote: &Self, context: &ResolutionContext) -> Self;
}

impl<T: Ord + Clone> Resolvable for ReplicatedSet<T> {
    fn merge_resolved(&self, remote: &Self, _context: &ResolutionContext) -> Self {
        self.merge(remote)
    }
}

/// Shallow field-precedence merge.
///
/// Remote fields are taken first and local fields overwrite them on key
/// collision; the result is stamped with [`RESOLVED_AT_FIELD`]. Nested
/// objects are not merged recursively.
impl Resolvable for Record {
    fn merge_resolved(&self, remote: &Self, context: &ResolutionContext) -> Self {
        let mut merged = remote.clone();
        for (key, value) in self {
            merged.insert(key.clone(), value.clone());
        }
        merged.insert(
            RESOLVED_AT_FIELD.to_string(),
            serde_json::Value::String(
                context
                    .resolved_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        );
        merged
    }
}

/// Resolves a local state against a remote state.
///
/// The strategy is bound when the resolver is built. Resolution never
/// mutates its inputs and never performs I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictResolver {
    strategy: ResolutionStrategy,
}

impl ConflictResolver {
    /// Creates a resolver with the given strategy.
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    /// Creates a resolver from a configuration string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnsupportedStrategy`] for unknown names.
    pub fn from_setting(setting: &str) -> ProtocolResult<Self> {
        setting.parse().map(Self::new)
    }

    /// Returns the bound strategy.
    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Resolves `local` against `remote`.
    pub fn resolve<R: Resolvable>(&self, local: &R, remote: &R, context: &ResolutionContext) -> R {
        match self.strategy {
            ResolutionStrategy::ClientWins => local.clone(),
            ResolutionStrategy::ServerWins => remote.clone(),
            ResolutionStrategy::Merge => local.merge_resolved(remote, context),
        }
    }

    /// Resolves two replicas of a set.
    ///
    /// Set resolution does not depend on the resolution time.
    pub fn resolve_sets<T: Ord + Clone>(
        &self,
        local: &ReplicatedSet<T>,
        remote: &ReplicatedSet<T>,
    ) -> ReplicatedSet<T> {
        self.resolve(local, remote, &ResolutionContext::at(DateTime::<Utc>::UNIX_EPOCH))
    }

    /// Resolves two versions of a structured record.
    pub fn resolve_records(
        &self,
        local: &Record,
        remote: &Record,
        context: &ResolutionContext,
    ) -> Record {
        self.resolve(local, remote, context)
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ResolutionStrategy::default())
    }
}
