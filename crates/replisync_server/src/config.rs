//! Server configuration.

use serde::{Deserialize, Serialize};

/// How the server applies a pushed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushPolicy {
    /// The pushed snapshot replaces the stored one.
    #[default]
    Replace,
    /// The pushed snapshot is merged into the stored one.
    Merge,
}

/// Configuration for the sync server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How pushes are applied.
    pub push_policy: PushPolicy,
    /// Largest snapshot accepted on push, in elements.
    pub max_snapshot_items: Option<usize>,
}

impl ServerConfig {
    /// Sets the push policy.
    pub fn with_push_policy(mut self, policy: PushPolicy) -> Self {
        self.push_policy = policy;
        self
    }

    /// Sets the largest accepted snapshot.
    pub fn with_max_snapshot_items(mut self, max: usize) -> Self {
        self.max_snapshot_items = Some(max);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            push_policy: PushPolicy::Replace,
            max_snapshot_items: None,
        }
    }
}
