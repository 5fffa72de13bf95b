//! Sync command implementation.

use super::{run_request, CommandResult};
use replisync_engine::{RetryConfig, SyncConfig, SyncOrchestrator, SyncRequest, TracingObserver};
use replisync_server::{PushPolicy, ServerConfig, ServerTransport, SyncServer};
use replisync_storage::FileStore;
use std::sync::Arc;

/// Options for the sync command.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Resolution strategy setting.
    pub strategy: String,
    /// How the remote applies pushes.
    pub push_policy: PushPolicy,
    /// Attempts per phase.
    pub attempts: u32,
}

/// Runs the sync command.
///
/// The remote directory is served in-process by a [`SyncServer`].
pub async fn run(
    store: FileStore<String>,
    remote: FileStore<String>,
    set_id: &str,
    options: &SyncOptions,
) -> CommandResult<()> {
    let server = Arc::new(SyncServer::new(
        ServerConfig::default().with_push_policy(options.push_policy),
        remote,
    ));
    let config = SyncConfig::default()
        .with_strategy_setting(options.strategy.as_str())
        .with_retry(RetryConfig::new(options.attempts));

    let orchestrator = SyncOrchestrator::new(config, store, ServerTransport::new(Arc::clone(&server)))
        .with_observer(TracingObserver);
    let outcome = run_request(orchestrator, SyncRequest::pull_and_resolve(set_id)).await?;

    tracing::info!(set_id, stats = ?server.stats(), "remote updated");
    println!(
        "{}: {} items synchronized ({})",
        set_id,
        outcome.item_count(),
        options.strategy
    );
    Ok(())
}
