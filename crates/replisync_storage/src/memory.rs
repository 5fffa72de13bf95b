//! In-memory snapshot store for testing.

use crate::error::{StorageError, StorageResult};
use crate::gateway::{check_key, check_save_key, PersistenceGateway};
use async_trait::async_trait;
use parking_lot::RwLock;
use replisync_protocol::{Element, Snapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory snapshot store.
///
/// This store keeps every snapshot in a map and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Replicas that don't need to survive a restart
///
/// A store can be switched offline with [`set_available`](Self::set_available)
/// to simulate an unreachable database.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across tasks.
#[derive(Debug)]
pub struct MemoryStore<T> {
    snapshots: RwLock<HashMap<String, Snapshot<T>>>,
    available: AtomicBool,
}

impl<T: Element> MemoryStore<T> {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Creates a store pre-populated with snapshots.
    #[must_use]
    pub fn with_snapshots<I: IntoIterator<Item = Snapshot<T>>>(snapshots: I) -> Self {
        let store = Self::new();
        {
            let mut map = store.snapshots.write();
            for snapshot in snapshots {
                map.insert(snapshot.id.clone(), snapshot);
            }
        }
        store
    }

    /// Marks the store as reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of stored snapshots.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Returns a copy of the snapshot stored for `set_id`.
    ///
    /// Bypasses the availability flag.
    #[must_use]
    pub fn get(&self, set_id: &str) -> Option<Snapshot<T>> {
        self.snapshots.read().get(set_id).cloned()
    }

    /// Removes every snapshot.
    pub fn clear(&self) {
        self.snapshots.write().clear();
    }

    fn ensure_available(&self) -> StorageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory store is offline".into()))
        }
    }
}

impl<T: Element> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Element> PersistenceGateway<T> for MemoryStore<T> {
    async fn open(&self) -> StorageResult<()> {
        self.ensure_available()
    }

    async fn load(&self, set_id: &str) -> StorageResult<Option<Snapshot<T>>> {
        self.ensure_available()?;
        check_key(set_id)?;
        Ok(self.snapshots.read().get(set_id).cloned())
    }

    async fn save(&self, set_id: &str, snapshot: &Snapshot<T>) -> StorageResult<()> {
        self.ensure_available()?;
        check_save_key(set_id, snapshot)?;
        self.snapshots
            .write()
            .insert(set_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn delete(&self, set_id: &str) -> StorageResult<bool> {
        self.ensure_available()?;
        check_key(set_id)?;
        Ok(self.snapshots.write().remove(set_id).is_some())
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        self.ensure_available()?;
        let mut ids: Vec<String> = self.snapshots.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
