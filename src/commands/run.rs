// ABOUTME: One replication pass over every configured table
// ABOUTME: Connects both ends, runs the orchestrator and reports per-table results

use anyhow::{Context, Result};

use crate::bigquery::BigQueryTarget;
use crate::config::ReplicatorConfig;
use crate::mssql::SqlServerSource;
use crate::sync::{CheckpointStore, SyncOptions, SyncOrchestrator, SyncStats};

/// Run one pass. Connection and checkpoint-file problems abort before any
/// table is touched; table failures are reported in the returned stats.
pub async fn run(config: &ReplicatorConfig, show_progress: bool) -> Result<SyncStats> {
    tracing::info!(
        "Replicating {} table(s) from {} to {}",
        config.tables.len(),
        config.source.endpoint(),
        config.target.endpoint()
    );

    let checkpoints = CheckpointStore::open(&config.state_path)
        .await
        .context("Failed to load replication state")?;

    let source = SqlServerSource::connect(&config.source).await?;
    let target = BigQueryTarget::connect(&config.target).await?;

    let options = SyncOptions {
        batch_size: config.batch_size,
        show_progress,
    };
    let mut orchestrator = SyncOrchestrator::new(source, target, checkpoints, options);
    let stats = orchestrator.run(&config.tables).await;

    report(&stats);
    Ok(stats)
}

fn report(stats: &SyncStats) {
    tracing::info!(
        "Replication finished in {} ms: {} table(s) synced, {} failed, {} rows loaded, {} rows deleted",
        stats.duration_ms,
        stats.tables_synced,
        stats.tables_failed,
        stats.rows_loaded,
        stats.rows_deleted
    );
    for (table, error) in &stats.errors {
        tracing::warn!("  {}: {}", table, error);
    }
}
