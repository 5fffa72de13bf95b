//! Merge command implementation.

use super::{run_request, CommandResult, Offline};
use replisync_engine::{SyncConfig, SyncOrchestrator, SyncRequest, TracingObserver};
use replisync_protocol::{ResolutionStrategy, Snapshot};
use replisync_storage::FileStore;
use std::path::Path;

/// Runs the merge command.
///
/// The snapshot file may come from another set; only its elements are used.
pub async fn run(store: FileStore<String>, set_id: &str, from: &Path) -> CommandResult<()> {
    let json = std::fs::read_to_string(from)?;
    let snapshot = Snapshot::<String>::from_json(&json)?;
    if snapshot.id != set_id {
        tracing::warn!(set_id, source_id = %snapshot.id, "merging elements of a different set");
    }

    let orchestrator = SyncOrchestrator::new(SyncConfig::new(ResolutionStrategy::Merge), store, Offline)
        .with_observer(TracingObserver);
    let outcome = run_request(orchestrator, SyncRequest::merge(set_id, snapshot.items)).await?;
    println!("{}: {} items", set_id, outcome.item_count());
    Ok(())
}
