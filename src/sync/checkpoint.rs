// ABOUTME: Durable per-table watermarks for resumable incremental sync
// ABOUTME: One JSON document rewritten in full, via temp file and rename, on every update

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::SyncError;

/// Checkpoint for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCheckpoint {
    /// Last change-feed version fully applied to the target
    pub last_sync_version: u64,
    /// When that version was recorded
    #[serde(deserialize_with = "deserialize_sync_time")]
    pub last_sync_time: DateTime<Utc>,
}

/// Accepts RFC 3339 timestamps and offset-less ISO-8601 ones (read as UTC),
/// as written by older state files.
fn deserialize_sync_time<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
        return Ok(ts);
    }
    chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Persisted watermarks, keyed by table name.
///
/// The on-disk document is `{"<table>": {"last_sync_version": n,
/// "last_sync_time": "<RFC 3339>"}, ...}`.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    tables: BTreeMap<String, TableCheckpoint>,
}

impl CheckpointStore {
    /// Open the store at `path`. A missing file is an empty store; an
    /// unreadable or malformed one is an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = match fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse checkpoint file {:?}", path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No checkpoint file at {:?}, starting fresh", path);
                BTreeMap::new()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read checkpoint file {:?}", path))
            }
        };

        Ok(Self { path, tables })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, table: &str) -> Option<&TableCheckpoint> {
        self.tables.get(table)
    }

    /// Last applied version, 0 for a table never synced.
    pub fn get_version(&self, table: &str) -> u64 {
        self.get(table).map(|c| c.last_sync_version).unwrap_or(0)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&String, &TableCheckpoint)> {
        self.tables.iter()
    }

    /// Record `version` for `table` and persist the whole document before
    /// returning.
    ///
    /// A version lower than the stored one is refused. The in-memory state is
    /// only updated once the write has succeeded.
    pub async fn set_version(&mut self, table: &str, version: u64) -> Result<(), SyncError> {
        let write_failure = |source: anyhow::Error| SyncError::CheckpointWriteFailure {
            table: table.to_string(),
            source,
        };

        if let Some(existing) = self.tables.get(table) {
            if version < existing.last_sync_version {
                return Err(write_failure(anyhow::anyhow!(
                    "refusing to move checkpoint backwards from {} to {}",
                    existing.last_sync_version,
                    version
                )));
            }
        }

        let mut updated = self.tables.clone();
        updated.insert(
            table.to_string(),
            TableCheckpoint {
                last_sync_version: version,
                last_sync_time: Utc::now(),
            },
        );

        write_document(&self.path, &updated)
            .await
            .map_err(write_failure)?;
        self.tables = updated;

        tracing::debug!("Checkpoint for {} set to version {}", table, version);
        Ok(())
    }
}

async fn write_document(path: &Path, tables: &BTreeMap<String, TableCheckpoint>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let contents = serde_json::to_string_pretty(tables).context("Failed to serialize checkpoints")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp)
        .await
        .with_context(|| format!("Failed to create checkpoint file {:?}", tmp))?;
    file.write_all(contents.as_bytes())
        .await
        .with_context(|| format!("Failed to write checkpoint file {:?}", tmp))?;
    file.flush()
        .await
        .with_context(|| format!("Failed to write checkpoint file {:?}", tmp))?;
    // Contents must be on disk before the rename makes them visible
    file.sync_all()
        .await
        .with_context(|| format!("Failed to flush checkpoint file {:?}", tmp))?;
    drop(file);

    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace checkpoint file {:?}", path))?;
    sync_parent_dir(path).await
}

/// Persist the rename itself by flushing the containing directory.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    let dir = fs::File::open(parent)
        .await
        .with_context(|| format!("Failed to open directory {:?}", parent))?;
    dir.sync_all()
        .await
        .with_context(|| format!("Failed to flush directory {:?}", parent))
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}
