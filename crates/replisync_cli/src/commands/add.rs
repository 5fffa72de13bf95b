//! Add command implementation.

use super::{CommandResult, Offline};
use replisync_engine::{
    ChannelConfig, SyncChannel, SyncConfig, SyncOrchestrator, SyncRequest, TracingObserver,
};
use replisync_protocol::ResolutionStrategy;
use replisync_storage::FileStore;

/// Runs the add command.
///
/// Each element is submitted as its own `Add` request; the channel applies
/// them in order.
pub async fn run(store: FileStore<String>, set_id: &str, items: Vec<String>) -> CommandResult<()> {
    let orchestrator = SyncOrchestrator::new(SyncConfig::new(ResolutionStrategy::Merge), store, Offline)
        .with_observer(TracingObserver);
    let channel = SyncChannel::spawn(orchestrator, ChannelConfig::default())?;

    let mut tickets = Vec::with_capacity(items.len());
    for item in items {
        tickets.push(channel.submit(SyncRequest::add(set_id, item)).await?);
    }

    let mut item_count = 0;
    for ticket in tickets {
        let outcome = ticket.outcome().await?;
        if let Some(error) = &outcome.error {
            return Err(format!("add failed: {}", error).into());
        }
        item_count = outcome.item_count();
    }
    channel.shutdown().await?;

    println!("{}: {} items", set_id, item_count);
    Ok(())
}
