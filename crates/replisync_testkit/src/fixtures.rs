//! Test fixtures.
//!
//! Provides temporary stores and fast configurations for sync tests.

use replisync_engine::{RetryConfig, SyncConfig};
use replisync_protocol::{Element, ResolutionStrategy, Snapshot};
use replisync_storage::{FileStore, FileStoreConfig, SnapshotEncoding};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// A file store in a temporary directory that is removed on drop.
pub struct TestStore<T> {
    /// The store instance.
    pub store: FileStore<T>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl<T: Element> TestStore<T> {
    /// Creates a JSON store in a fresh temporary directory.
    pub fn new() -> Self {
        Self::with_encoding(SnapshotEncoding::Json)
    }

    /// Creates a store with the given encoding.
    ///
    /// fsync is disabled; temporary directories do not need durability.
    pub fn with_encoding(encoding: SnapshotEncoding) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = FileStoreConfig::default()
            .with_encoding(encoding)
            .with_sync_writes(false);
        Self {
            store: FileStore::new(temp_dir.path().join("sets"), config),
            _temp_dir: temp_dir,
        }
    }

    /// Returns the directory holding the snapshot files.
    pub fn path(&self) -> &Path {
        self.store.dir()
    }
}

impl<T: Element> Default for TestStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::ops::Deref for TestStore<T> {
    type Target = FileStore<T>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Retry policy with small, deterministic delays.
///
/// Delays are 100ms, 200ms, 400ms and so on, without jitter.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts)
        .with_initial_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_jitter(false)
}

/// Sync configuration for tests: `strategy`, three attempts per phase
/// with [`fast_retry`] delays, and no timeout.
pub fn test_config(strategy: ResolutionStrategy) -> SyncConfig {
    SyncConfig::new(strategy)
        .with_retry(fast_retry(3))
        .without_timeout()
}

/// Builds a string snapshot.
pub fn string_snapshot(id: &str, items: &[&str]) -> Snapshot<String> {
    Snapshot::new(id, items.iter().map(|s| s.to_string()).collect())
}
