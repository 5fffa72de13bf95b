//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use async_trait::async_trait;
use replisync_engine::{decode_path_segment, HttpMethod, HttpResponse, LoopbackServer};
use replisync_protocol::{Element, Snapshot};
use replisync_storage::{PersistenceGateway, StorageError};
use serde::{Deserialize, Serialize};

/// Counters kept by a [`SyncServer`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    /// Fetches served, including misses.
    pub fetches: u64,
    /// Pushes stored.
    pub pushes: u64,
    /// Pushes rejected before reaching the store.
    pub rejected: u64,
}

/// The sync server.
///
/// Holds the authoritative snapshot of every set in a
/// [`PersistenceGateway`] and serves fetch and push requests. HTTP routing
/// is provided through [`LoopbackServer`].
///
/// # Example
///
/// ```
/// use replisync_protocol::Snapshot;
/// use replisync_server::{ServerConfig, SyncServer};
/// use replisync_storage::MemoryStore;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let server = SyncServer::new(ServerConfig::default(), MemoryStore::<String>::new());
///
/// server
///     .handle_push("todos", Snapshot::new("todos", vec!["a".to_string()]))
///     .await
///     .unwrap();
/// let fetched = server.handle_fetch("todos").await.unwrap().unwrap();
/// assert_eq!(fetched.items, vec!["a".to_string()]);
/// # });
/// ```
pub struct SyncServer<T, S> {
    context: HandlerContext<T, S>,
}

impl<T: Element, S: PersistenceGateway<T>> SyncServer<T, S> {
    /// Creates a new sync server over the given store.
    pub fn new(config: ServerConfig, store: S) -> Self {
        Self {
            context: HandlerContext::new(config, store),
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the backing store.
    pub fn store(&self) -> &S {
        &self.context.store
    }

    /// Returns a copy of the server counters.
    pub fn stats(&self) -> ServerStats {
        self.context.stats.read().clone()
    }

    /// Prepares the backing store.
    pub async fn open(&self) -> ServerResult<()> {
        Ok(self.context.store.open().await?)
    }

    /// Returns the stored snapshot of a set, if any.
    pub async fn handle_fetch(&self, set_id: &str) -> ServerResult<Option<Snapshot<T>>> {
        RequestHandler::new(&self.context).handle_fetch(set_id).await
    }

    /// Stores a pushed snapshot and returns what the server now holds.
    pub async fn handle_push(&self, set_id: &str, snapshot: Snapshot<T>) -> ServerResult<Snapshot<T>> {
        RequestHandler::new(&self.context)
            .handle_push(set_id, snapshot)
            .await
    }

    /// Returns the ids of all stored sets.
    pub async fn set_ids(&self) -> ServerResult<Vec<String>> {
        Ok(self.context.store.list().await?)
    }

    /// Routes an HTTP request.
    async fn route(&self, method: HttpMethod, path: &str, body: &[u8]) -> ServerResult<HttpResponse> {
        let set_id = path
            .strip_prefix("/sets/")
            .filter(|segment| !segment.is_empty() && !segment.contains('/'))
            .ok_or_else(|| ServerError::NotFound {
                method: method.to_string(),
                path: path.to_string(),
            })?;
        let set_id = decode_path_segment(set_id)
            .ok_or_else(|| ServerError::InvalidRequest(format!("malformed set id {:?}", set_id)))?;

        match method {
            HttpMethod::Get => match self.handle_fetch(&set_id).await? {
                Some(snapshot) => snapshot
                    .to_json_vec()
                    .map(HttpResponse::ok)
                    .map_err(|e| ServerError::Storage(StorageError::Codec(e.to_string()))),
                None => Ok(HttpResponse::not_found()),
            },
            HttpMethod::Put => {
                let snapshot = Snapshot::from_json_slice(body)
                    .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
                self.handle_push(&set_id, snapshot).await?;
                Ok(HttpResponse::no_content())
            }
        }
    }
}

#[async_trait]
impl<T: Element, S: PersistenceGateway<T>> LoopbackServer for SyncServer<T, S> {
    async fn handle(&self, method: HttpMethod, path: &str, body: &[u8]) -> HttpResponse {
        match self.route(method, path, body).await {
            Ok(response) => response,
            Err(err) => {
                if err.is_server_error() {
                    tracing::error!(%method, path, error = %err, "request failed");
                }
                HttpResponse::error(err.status(), err)
            }
        }
    }
}
