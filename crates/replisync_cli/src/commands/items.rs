//! Items command implementation.

use super::{run_request, CommandResult, Offline};
use replisync_engine::{SyncConfig, SyncOrchestrator, SyncRequest};
use replisync_protocol::{ResolutionStrategy, Snapshot};
use replisync_storage::FileStore;

/// Runs the items command.
pub async fn run(store: FileStore<String>, set_id: &str, format: &str) -> CommandResult<()> {
    let items = read(store, set_id).await?;
    match format {
        "json" => {
            let snapshot = Snapshot::new(set_id, items);
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        _ => {
            for item in items {
                println!("{}", item);
            }
        }
    }
    Ok(())
}

/// Reads the elements of `set_id`. Unknown sets are empty.
pub async fn read(store: FileStore<String>, set_id: &str) -> CommandResult<Vec<String>> {
    let orchestrator = SyncOrchestrator::new(SyncConfig::new(ResolutionStrategy::Merge), store, Offline);
    let outcome = run_request(orchestrator, SyncRequest::get_items(set_id)).await?;
    Ok(outcome.items)
}
