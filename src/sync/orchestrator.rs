// ABOUTME: Per-table sync state machine and the multi-table run driver
// ABOUTME: Routes each table to initial load or incremental sync and advances its checkpoint last

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

use super::changes::ChangeSetFetcher;
use super::checkpoint::CheckpointStore;
use super::loader::Loader;
use super::pager::Pager;
use super::schema::map_schema;
use crate::error::SyncError;
use crate::source::SourceDatabase;
use crate::target::{TargetWarehouse, WriteDisposition};

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Rows per page during initial load
    pub batch_size: usize,
    /// Draw a progress bar during initial loads
    pub show_progress: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            show_progress: false,
        }
    }
}

/// What a successful pass did for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    /// Full scan loaded into the target, checkpoint recorded at `version`.
    InitialLoad { rows: u64, version: u64 },
    /// Changes in `(from, to]` applied.
    Incremental {
        upserts: u64,
        deletes: u64,
        from: u64,
        to: u64,
    },
    /// Nothing new in the change feed.
    UpToDate { version: u64 },
}

/// Statistics from one run over the configured tables.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub tables_synced: usize,
    pub tables_failed: usize,
    pub rows_loaded: u64,
    pub rows_deleted: u64,
    /// `(table, message)` per failed table
    pub errors: Vec<(String, String)>,
    pub duration_ms: u64,
}

impl SyncStats {
    /// True only if every table reached a synced state.
    pub fn is_success(&self) -> bool {
        self.tables_failed == 0 && self.errors.is_empty()
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.errors.iter().map(|(t, _)| t.as_str()).collect()
    }
}

/// Drives synchronization of tables from `S` into `T`.
///
/// Tables are processed one after the other on a single source connection.
/// Each table's checkpoint is written only after its changes are applied, so
/// a crash in between replays the same window on the next run.
pub struct SyncOrchestrator<S: SourceDatabase, T: TargetWarehouse> {
    source: S,
    target: T,
    checkpoints: CheckpointStore,
    options: SyncOptions,
}

impl<S: SourceDatabase, T: TargetWarehouse> SyncOrchestrator<S, T> {
    pub fn new(source: S, target: T, checkpoints: CheckpointStore, options: SyncOptions) -> Self {
        Self {
            source,
            target,
            checkpoints,
            options,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn into_parts(self) -> (S, T, CheckpointStore) {
        (self.source, self.target, self.checkpoints)
    }

    /// Synchronize every table in `tables`, independently.
    ///
    /// A failing table is logged and counted; it never stops the others.
    pub async fn run(&mut self, tables: &[String]) -> SyncStats {
        let start = Instant::now();
        let mut stats = SyncStats::default();

        for table in tables {
            tracing::info!("Syncing table {}", table);
            match self.sync_table(table).await {
                Ok(outcome) => {
                    stats.tables_synced += 1;
                    match outcome {
                        TableOutcome::InitialLoad { rows, version } => {
                            stats.rows_loaded += rows;
                            tracing::info!(
                                "Initial load of {} complete: {} rows, checkpoint at version {}",
                                table,
                                rows,
                                version
                            );
                        }
                        TableOutcome::Incremental {
                            upserts,
                            deletes,
                            from,
                            to,
                        } => {
                            stats.rows_loaded += upserts;
                            stats.rows_deleted += deletes;
                            tracing::info!(
                                "Incremental sync of {} complete: {} upserts, {} deletes, version {} -> {}",
                                table,
                                upserts,
                                deletes,
                                from,
                                to
                            );
                        }
                        TableOutcome::UpToDate { version } => {
                            tracing::info!("{} is up to date at version {}", table, version);
                        }
                    }
                }
                Err(e) => {
                    stats.tables_failed += 1;
                    let kind = e.kind();
                    let err = anyhow::Error::from(e);
                    // Log with :? to show full error chain including root cause
                    tracing::error!("Failed to sync {} ({}): {:?}", table, kind, err);
                    stats.errors.push((table.clone(), format!("{:#}", err)));
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        stats
    }

    /// One pass of the state machine for `table`.
    ///
    /// A table is incremental only when both its target table and its
    /// checkpoint exist. A target table without a checkpoint is left over from
    /// an initial load that did not finish, and is loaded again.
    pub async fn sync_table(&mut self, table: &str) -> Result<TableOutcome, SyncError> {
        let target_exists = self
            .target
            .table_exists(table)
            .await
            .map_err(|source| SyncError::CreateTableFailure {
                table: table.to_string(),
                source: source.context("could not check whether the target table exists"),
            })?;

        if target_exists && self.checkpoints.contains(table) {
            self.incremental(table).await
        } else {
            if target_exists {
                tracing::warn!(
                    "Target table {} exists without a checkpoint, reloading it",
                    table
                );
            }
            self.initial_load(table, target_exists).await
        }
    }

    async fn initial_load(
        &mut self,
        table: &str,
        target_exists: bool,
    ) -> Result<TableOutcome, SyncError> {
        let read_failure = |source: anyhow::Error| SyncError::SourceReadFailure {
            table: table.to_string(),
            source,
        };

        if !self
            .source
            .change_tracking_enabled(table)
            .await
            .map_err(read_failure)?
        {
            return Err(SyncError::ChangeTrackingUnavailable {
                table: table.to_string(),
            });
        }

        let descriptor =
            self.source
                .describe_table(table)
                .await
                .map_err(|source| SyncError::SchemaFetchFailure {
                    table: table.to_string(),
                    source,
                })?;

        if !descriptor.has_primary_key() {
            tracing::warn!(
                "Table {} has no primary key: loading with offset paging, which can skip or \
                 duplicate rows if the table changes during the scan; incremental sync will be refused",
                table
            );
        }

        if target_exists {
            tracing::info!("Target table {} already exists, replacing its content", table);
        } else {
            let schema = map_schema(&descriptor.columns, &descriptor.primary_key);
            for warning in &schema.warnings {
                tracing::warn!("{}: {}", table, warning);
            }
            self.target
                .create_table(table, &schema)
                .await
                .map_err(|source| SyncError::CreateTableFailure {
                    table: table.to_string(),
                    source,
                })?;
            tracing::info!("Created target table {}", table);
        }

        let progress = self.progress_bar(table).await;
        let loader = Loader::new(&self.target);
        let mut pager = Pager::new(&mut self.source, &descriptor, self.options.batch_size);
        let mut rows_loaded = 0u64;
        let mut disposition = WriteDisposition::Replace;

        while let Some(batch) = pager.next_batch().await? {
            rows_loaded += loader.apply_upserts(table, &batch, disposition).await?;
            disposition = WriteDisposition::Append;
            progress.inc(batch.len() as u64);
        }
        let pages = pager.pages_read();
        progress.finish_and_clear();

        if rows_loaded == 0 && target_exists {
            // No page was written with Replace, so stale rows would remain
            loader.clear_table(table).await?;
        }
        tracing::debug!("Scanned {} in {} pages", table, pages);

        let version = self
            .source
            .current_version()
            .await
            .map_err(read_failure)?;
        let version = self.advance_checkpoint(table, version).await?;

        Ok(TableOutcome::InitialLoad {
            rows: rows_loaded,
            version,
        })
    }

    async fn incremental(&mut self, table: &str) -> Result<TableOutcome, SyncError> {
        let since = self.checkpoints.get_version(table);

        let descriptor =
            self.source
                .describe_table(table)
                .await
                .map_err(|source| SyncError::SchemaFetchFailure {
                    table: table.to_string(),
                    source,
                })?;

        let changes = ChangeSetFetcher::new(&mut self.source)
            .fetch_changes(&descriptor, since)
            .await?;

        if changes.new_version <= since {
            if changes.new_version < since {
                tracing::warn!(
                    "Change feed version {} for {} is behind checkpoint {}, leaving checkpoint unchanged",
                    changes.new_version,
                    table,
                    since
                );
            }
            return Ok(TableOutcome::UpToDate { version: since });
        }

        let loader = Loader::new(&self.target);
        // Upserts before deletes so a delete in the same window always wins
        let upserts = loader
            .apply_upserts(table, &changes.upserts, WriteDisposition::Append)
            .await?;
        loader
            .apply_deletes(table, &descriptor.primary_key, &changes.deletes)
            .await?;
        let deletes = changes.deletes.len() as u64;

        let to = self.advance_checkpoint(table, changes.new_version).await?;

        Ok(TableOutcome::Incremental {
            upserts,
            deletes,
            from: since,
            to,
        })
    }

    /// Persist `version` unless it would move the checkpoint backwards.
    /// Returns the checkpoint in effect afterwards.
    async fn advance_checkpoint(&mut self, table: &str, version: u64) -> Result<u64, SyncError> {
        if let Some(existing) = self.checkpoints.get(table) {
            let current = existing.last_sync_version;
            if version < current {
                tracing::warn!(
                    "Version {} for {} is lower than checkpoint {}, keeping checkpoint",
                    version,
                    table,
                    current
                );
                return Ok(current);
            }
            if version == current {
                return Ok(current);
            }
        }

        self.checkpoints.set_version(table, version).await?;
        Ok(version)
    }

    async fn progress_bar(&mut self, table: &str) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }

        let total = match self.source.count_rows(table).await {
            Ok(total) => total,
            Err(e) => {
                tracing::debug!("Could not count rows of {}: {:#}", table, e);
                return ProgressBar::hidden();
            }
        };

        let pb = ProgressBar::new(total);
        match ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>9}/{len:9} {msg}")
        {
            Ok(style) => pb.set_style(style.progress_chars("##-")),
            Err(e) => tracing::debug!("Invalid progress template: {}", e),
        }
        pb.set_message(table.to_string());
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_stats_success() {
        let stats = SyncStats {
            tables_synced: 2,
            rows_loaded: 30,
            ..Default::default()
        };
        assert!(stats.is_success());
    }

    #[test]
    fn test_sync_stats_with_errors() {
        let stats = SyncStats {
            tables_synced: 1,
            tables_failed: 1,
            errors: vec![("audit_log".to_string(), "missing primary key".to_string())],
            ..Default::default()
        };
        assert!(!stats.is_success());
        assert_eq!(stats.failed_tables(), vec!["audit_log"]);
    }
}
