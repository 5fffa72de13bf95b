//! Persistence gateway trait definition.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use replisync_protocol::{Element, Snapshot};
use std::sync::Arc;

/// Durable load/save of replicated set snapshots.
///
/// A gateway is a **key/value store of whole snapshots**. It does not merge,
/// diff or interpret elements; the sync engine owns all replication logic.
///
/// # Invariants
///
/// - `load` returns `Ok(None)` for a set that was never saved
/// - `load` after a successful `save` returns exactly the saved snapshot
/// - `save` is idempotent: saving the same snapshot twice stores the same value
/// - Gateways must be `Send + Sync` for use from the background worker
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
#[async_trait]
pub trait PersistenceGateway<T: Element>: Send + Sync {
    /// Checks that the store can be used.
    ///
    /// Called before every sync cycle. The default implementation always
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or closed.
    async fn open(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Loads the snapshot stored for `set_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read or decoded.
    async fn load(&self, set_id: &str) -> StorageResult<Option<Snapshot<T>>>;

    /// Stores `snapshot` under `set_id`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `set_id` is not a valid key
    /// - `snapshot.id` differs from `set_id`
    /// - The write fails
    async fn save(&self, set_id: &str, snapshot: &Snapshot<T>) -> StorageResult<()>;

    /// Deletes the snapshot stored for `set_id`.
    ///
    /// Returns `true` if a snapshot was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn delete(&self, set_id: &str) -> StorageResult<bool>;

    /// Lists the ids of all stored sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    async fn list(&self) -> StorageResult<Vec<String>>;

    /// Returns true if repeated identical saves are guaranteed to be harmless.
    ///
    /// The sync engine only retries a failed save when this holds.
    fn idempotent_writes(&self) -> bool {
        true
    }
}

#[async_trait]
impl<T, P> PersistenceGateway<T> for Arc<P>
where
    T: Element,
    P: PersistenceGateway<T> + ?Sized,
{
    async fn open(&self) -> StorageResult<()> {
        (**self).open().await
    }

    async fn load(&self, set_id: &str) -> StorageResult<Option<Snapshot<T>>> {
        (**self).load(set_id).await
    }

    async fn save(&self, set_id: &str, snapshot: &Snapshot<T>) -> StorageResult<()> {
        (**self).save(set_id, snapshot).await
    }

    async fn delete(&self, set_id: &str) -> StorageResult<bool> {
        (**self).delete(set_id).await
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        (**self).list().await
    }

    fn idempotent_writes(&self) -> bool {
        (**self).idempotent_writes()
    }
}

/// Checks that `set_id` is usable as a key and matches the snapshot it keys.
pub(crate) fn check_save_key<T>(set_id: &str, snapshot: &Snapshot<T>) -> StorageResult<()> {
    check_key(set_id)?;
    if snapshot.id != set_id {
        return Err(StorageError::IdMismatch {
            key: set_id.to_string(),
            snapshot_id: snapshot.id.clone(),
        });
    }
    Ok(())
}

/// Checks that `set_id` is usable as a key.
pub(crate) fn check_key(set_id: &str) -> StorageResult<()> {
    if set_id.is_empty() || set_id.chars().any(char::is_control) {
        return Err(StorageError::InvalidSetId(set_id.to_string()));
    }
    Ok(())
}
