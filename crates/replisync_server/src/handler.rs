//! Request handlers.

use crate::config::{PushPolicy, ServerConfig};
use crate::error::{ServerError, ServerResult};
use crate::server::ServerStats;
use parking_lot::RwLock;
use replisync_protocol::{Element, ReplicatedSet, Snapshot};
use replisync_storage::PersistenceGateway;
use std::marker::PhantomData;

/// Shared state for request handlers.
pub(crate) struct HandlerContext<T, S> {
    pub config: ServerConfig,
    pub store: S,
    /// Serializes read-modify-write pushes.
    pub push_lock: tokio::sync::Mutex<()>,
    pub stats: RwLock<ServerStats>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element, S: PersistenceGateway<T>> HandlerContext<T, S> {
    pub fn new(config: ServerConfig, store: S) -> Self {
        Self {
            config,
            store,
            push_lock: tokio::sync::Mutex::new(()),
            stats: RwLock::new(ServerStats::default()),
            _marker: PhantomData,
        }
    }
}

/// Handles typed fetch and push requests against the store.
pub(crate) struct RequestHandler<'a, T, S> {
    context: &'a HandlerContext<T, S>,
}

impl<'a, T: Element, S: PersistenceGateway<T>> RequestHandler<'a, T, S> {
    pub fn new(context: &'a HandlerContext<T, S>) -> Self {
        Self { context }
    }

    pub async fn handle_fetch(&self, set_id: &str) -> ServerResult<Option<Snapshot<T>>> {
        let snapshot = self.context.store.load(set_id).await?;
        self.context.stats.write().fetches += 1;
        tracing::debug!(
            set_id,
            found = snapshot.is_some(),
            "handled fetch"
        );
        Ok(snapshot)
    }

    pub async fn handle_push(&self, set_id: &str, snapshot: Snapshot<T>) -> ServerResult<Snapshot<T>> {
        if let Err(err) = self.validate_push(set_id, &snapshot) {
            self.context.stats.write().rejected += 1;
            tracing::warn!(set_id, error = %err, "rejected push");
            return Err(err);
        }

        let _guard = self.context.push_lock.lock().await;
        let stored = match self.context.config.push_policy {
            PushPolicy::Replace => ReplicatedSet::from_snapshot(snapshot),
            PushPolicy::Merge => {
                let pushed = ReplicatedSet::from_snapshot(snapshot);
                match self.context.store.load(set_id).await? {
                    Some(current) => ReplicatedSet::from_snapshot(current).merge(&pushed),
                    None => pushed,
                }
            }
        };
        let stored = stored.to_snapshot();
        self.context.store.save(set_id, &stored).await?;
        self.context.stats.write().pushes += 1;

        tracing::debug!(
            set_id,
            items = stored.len(),
            policy = ?self.context.config.push_policy,
            "handled push"
        );
        Ok(stored)
    }

    fn validate_push(&self, set_id: &str, snapshot: &Snapshot<T>) -> ServerResult<()> {
        if snapshot.id != set_id {
            return Err(ServerError::InvalidRequest(format!(
                "snapshot id {:?} does not match resource {:?}",
                snapshot.id, set_id
            )));
        }
        if let Some(limit) = self.context.config.max_snapshot_items {
            if snapshot.len() > limit {
                return Err(ServerError::TooLarge {
                    items: snapshot.len(),
                    limit,
                });
            }
        }
        Ok(())
    }
}
