// ABOUTME: Fetches the net change set for a table since a watermark
// ABOUTME: Reads the change feed for (since, current] and collapses it to upserts and key-only deletes

use std::collections::HashMap;

use crate::error::SyncError;
use crate::source::SourceDatabase;
use crate::types::{ChangeOperation, ChangeRecord, ChangeSet, Row, TableDescriptor};

/// Reads change sets from a source's change feed.
pub struct ChangeSetFetcher<'a, S: SourceDatabase + ?Sized> {
    source: &'a mut S,
}

impl<'a, S: SourceDatabase + ?Sized> ChangeSetFetcher<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self { source }
    }

    /// Net changes to `table` after `since`.
    ///
    /// When the feed's current version is not past `since` the result is an
    /// empty change set carrying that version. Deletes carry only the primary
    /// key. A key touched several times in the window appears once, with the
    /// operation of its latest record; on a version tie the delete wins.
    pub async fn fetch_changes(
        &mut self,
        table: &TableDescriptor,
        since: u64,
    ) -> Result<ChangeSet, SyncError> {
        let name = table.name.as_str();
        let read_failure = |source: anyhow::Error| SyncError::SourceReadFailure {
            table: name.to_string(),
            source,
        };

        let enabled = self
            .source
            .change_tracking_enabled(name)
            .await
            .map_err(read_failure)?;
        if !enabled {
            return Err(SyncError::ChangeTrackingUnavailable {
                table: name.to_string(),
            });
        }
        if !table.has_primary_key() {
            return Err(SyncError::MissingPrimaryKey {
                table: name.to_string(),
            });
        }

        let current = self.source.current_version().await.map_err(read_failure)?;
        if current <= since {
            tracing::debug!(
                "Change feed for {} at version {} (watermark {}), nothing to fetch",
                name,
                current,
                since
            );
            return Ok(ChangeSet::empty(current));
        }

        if let Some(min_valid) = self
            .source
            .min_valid_version(name)
            .await
            .map_err(read_failure)?
        {
            if min_valid > since {
                return Err(SyncError::WatermarkExpired {
                    table: name.to_string(),
                    watermark: since,
                    min_valid,
                });
            }
        }

        let records = self
            .source
            .read_changes(table, since, current)
            .await
            .map_err(read_failure)?;
        tracing::debug!(
            "Read {} change records for {} in ({}, {}]",
            records.len(),
            name,
            since,
            current
        );

        collapse(table, records, current)
    }
}

/// Reduce raw feed records to one net operation per key.
pub(crate) fn collapse(
    table: &TableDescriptor,
    records: Vec<ChangeRecord>,
    new_version: u64,
) -> Result<ChangeSet, SyncError> {
    let invalid = |source: anyhow::Error| SyncError::InvalidRow {
        table: table.name.clone(),
        source,
    };

    // Keep key order of first appearance so output is deterministic
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, ChangeRecord> = HashMap::new();

    for record in records {
        let key = record
            .key
            .project(&table.primary_key)
            .map_err(invalid)?;
        let identity = key_identity(&key, &table.primary_key).map_err(invalid)?;
        let record = ChangeRecord { key, ..record };

        match latest.get(&identity) {
            None => {
                order.push(identity.clone());
                latest.insert(identity, record);
            }
            Some(existing) if supersedes(&record, existing) => {
                latest.insert(identity, record);
            }
            Some(_) => {}
        }
    }

    let mut changes = ChangeSet::empty(new_version);
    for identity in order {
        let Some(record) = latest.remove(&identity) else {
            continue;
        };
        match (record.operation, record.row) {
            (ChangeOperation::Delete, _) => {
                record.key.validate_key(table).map_err(invalid)?;
                changes.deletes.push(record.key);
            }
            (_, Some(row)) => {
                row.validate(table).map_err(invalid)?;
                changes.upserts.push(row);
            }
            (operation, None) => {
                // Row was removed after this change; its delete is a later record
                // outside the window and will be picked up on the next pass.
                tracing::debug!(
                    "Skipping {} for {} key {}: row no longer present in source",
                    operation.as_str(),
                    table.name,
                    identity
                );
            }
        }
    }

    Ok(changes)
}

fn supersedes(candidate: &ChangeRecord, existing: &ChangeRecord) -> bool {
    candidate.version > existing.version
        || (candidate.version == existing.version
            && candidate.operation == ChangeOperation::Delete)
}

fn key_identity(key: &Row, key_columns: &[String]) -> anyhow::Result<String> {
    let values = key.key_values(key_columns)?;
    Ok(format!("{:?}", values))
}
