// ABOUTME: Prints the stored checkpoint of every replicated table
// ABOUTME: Reads only the state file; never connects to either database

use anyhow::{Context, Result};
use std::path::Path;

use crate::sync::CheckpointStore;

pub async fn status(state_path: &Path) -> Result<()> {
    let store = CheckpointStore::open(state_path)
        .await
        .context("Failed to load replication state")?;

    let lines = render(&store);
    if lines.is_empty() {
        println!("No tables have been replicated yet ({:?}).", store.path());
        return Ok(());
    }

    println!("Replication state from {:?}:", store.path());
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn render(store: &CheckpointStore) -> Vec<String> {
    store
        .tables()
        .map(|(table, checkpoint)| {
            format!(
                "  {:<32} version {:>12}  synced at {}",
                table,
                checkpoint.last_sync_version,
                checkpoint.last_sync_time.to_rfc3339()
            )
        })
        .collect()
}
