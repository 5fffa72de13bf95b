//! CLI command implementations.

pub mod add;
pub mod inspect;
pub mod items;
pub mod merge;
pub mod sync;

use async_trait::async_trait;
use replisync_engine::{
    ChannelConfig, SyncChannel, SyncExecutor, SyncOutcome, SyncRequest,
    TransportError, TransportGateway, TransportResult,
};
use replisync_protocol::Snapshot;
use replisync_storage::{FileStore, FileStoreConfig, SnapshotEncoding};
use std::error::Error;
use std::path::Path;

/// Result type for commands.
pub type CommandResult<T> = Result<T, Box<dyn Error>>;

/// Opens the set directory at `path`.
pub fn local_store(path: &Path, encoding: SnapshotEncoding) -> FileStore<String> {
    FileStore::new(path, FileStoreConfig::default().with_encoding(encoding))
}

/// Transport for commands that never leave the local store.
pub struct Offline;

#[async_trait]
impl TransportGateway<String> for Offline {
    async fn connect(&self) -> TransportResult<()> {
        Err(TransportError::fatal("no remote configured"))
    }

    async fn fetch(&self, _set_id: &str) -> TransportResult<Option<Snapshot<String>>> {
        Err(TransportError::fatal("no remote configured"))
    }

    async fn push(&self, _set_id: &str, _snapshot: &Snapshot<String>) -> TransportResult<()> {
        Err(TransportError::fatal("no remote configured"))
    }
}

/// Runs one request through a sync channel and waits for its outcome.
///
/// A failed outcome is returned as an error.
pub async fn run_request<E>(executor: E, request: SyncRequest<String>) -> CommandResult<SyncOutcome<String>>
where
    E: SyncExecutor<String> + 'static,
{
    let channel = SyncChannel::spawn(executor, ChannelConfig::default().with_queue_capacity(1))?;
    let outcome = channel.request(request).await?;
    channel.shutdown().await?;

    match outcome.error_kind() {
        None => Ok(outcome),
        Some(kind) => Err(format!(
            "{} failed: {}",
            kind,
            outcome.error.as_deref().unwrap_or("unknown error")
        )
        .into()),
    }
}
