//! Inspect command implementation.

use super::CommandResult;
use replisync_storage::{FileStore, PersistenceGateway};
use serde::Serialize;

/// Inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Set directory.
    pub path: String,
    /// On-disk encoding.
    pub encoding: String,
    /// Stored sets.
    pub sets: Vec<SetStats>,
}

/// Statistics for a single set.
#[derive(Debug, Serialize)]
pub struct SetStats {
    /// Set id.
    pub id: String,
    /// Stored elements, duplicates included.
    pub stored_items: usize,
    /// Distinct elements.
    pub distinct_items: usize,
}

/// Runs the inspect command.
pub async fn run(store: &FileStore<String>, format: &str) -> CommandResult<()> {
    let result = inspect(store).await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects statistics for every stored set.
pub async fn inspect(store: &FileStore<String>) -> CommandResult<InspectResult> {
    if !store.dir().exists() {
        return Err(format!("No sets found at {:?}", store.dir()).into());
    }

    let mut sets = Vec::new();
    for id in store.list().await? {
        let Some(snapshot) = store.load(&id).await? else {
            continue;
        };
        let mut distinct = snapshot.items.clone();
        distinct.sort();
        distinct.dedup();
        sets.push(SetStats {
            id,
            stored_items: snapshot.len(),
            distinct_items: distinct.len(),
        });
    }

    Ok(InspectResult {
        path: store.dir().display().to_string(),
        encoding: store.config().encoding.extension().to_string(),
        sets,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Set directory: {}", result.path);
    println!("Encoding:      {}", result.encoding);
    println!("Sets:          {}", result.sets.len());
    for set in &result.sets {
        if set.stored_items == set.distinct_items {
            println!("  {:<24} {} items", set.id, set.distinct_items);
        } else {
            println!(
                "  {:<24} {} items ({} stored)",
                set.id, set.distinct_items, set.stored_items
            );
        }
    }
}
