//! In-process transport to a [`SyncServer`].

use crate::error::ServerError;
use crate::server::SyncServer;
use async_trait::async_trait;
use replisync_engine::{TransportError, TransportGateway, TransportResult};
use replisync_protocol::{Element, Snapshot};
use replisync_storage::PersistenceGateway;
use std::sync::Arc;

/// A [`TransportGateway`] that calls a [`SyncServer`] directly.
///
/// Server-side failures map to retryable transport errors; rejected
/// requests map to fatal ones.
pub struct ServerTransport<T, S> {
    server: Arc<SyncServer<T, S>>,
}

impl<T, S> ServerTransport<T, S> {
    /// Creates a transport bound to `server`.
    pub fn new(server: Arc<SyncServer<T, S>>) -> Self {
        Self { server }
    }

    /// Returns the server behind this transport.
    pub fn server(&self) -> &Arc<SyncServer<T, S>> {
        &self.server
    }
}

impl<T, S> Clone for ServerTransport<T, S> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
        }
    }
}

fn transport_error(err: ServerError) -> TransportError {
    TransportError::from_status(err.status(), err.to_string())
}

#[async_trait]
impl<T, S> TransportGateway<T> for ServerTransport<T, S>
where
    T: Element,
    S: PersistenceGateway<T>,
{
    async fn connect(&self) -> TransportResult<()> {
        self.server.open().await.map_err(transport_error)
    }

    async fn fetch(&self, set_id: &str) -> TransportResult<Option<Snapshot<T>>> {
        self.server.handle_fetch(set_id).await.map_err(transport_error)
    }

    async fn push(&self, set_id: &str, snapshot: &Snapshot<T>) -> TransportResult<()> {
        self.server
            .handle_push(set_id, snapshot.clone())
            .await
            .map(|_| ())
            .map_err(transport_error)
    }
}
