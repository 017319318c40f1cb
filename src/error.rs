// ABOUTME: Typed error kinds for the sync engine and configuration validation
// ABOUTME: Per-table failures are values the orchestrator records, never process-level panics

use thiserror::Error;

/// Failure of one table's synchronization pass (or of the run's connections).
///
/// Driver code works in `anyhow::Result`; the engine wraps those errors into
/// the kind that names the step which failed, keeping the original error as
/// the source so `{:?}` shows the full chain.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection to {endpoint} failed")]
    ConnectionFailure {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("change tracking is not enabled for table {table}")]
    ChangeTrackingUnavailable { table: String },

    #[error("table {table} has no primary key; change identification requires one")]
    MissingPrimaryKey { table: String },

    #[error("failed to fetch schema for table {table}")]
    SchemaFetchFailure {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create target table {table}")]
    CreateTableFailure {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read from source table {table}")]
    SourceReadFailure {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "watermark {watermark} for table {table} is older than the change feed's minimum valid version {min_valid}; the table must be reloaded"
    )]
    WatermarkExpired {
        table: String,
        watermark: u64,
        min_valid: u64,
    },

    #[error("invalid row for table {table}")]
    InvalidRow {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to load rows into {table}")]
    LoadFailure {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to delete rows from {table}")]
    DeleteFailure {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist checkpoint for {table}")]
    CheckpointWriteFailure {
        table: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SyncError {
    /// The table the error belongs to, if it is table-scoped.
    pub fn table(&self) -> Option<&str> {
        match self {
            SyncError::ConnectionFailure { .. } => None,
            SyncError::ChangeTrackingUnavailable { table }
            | SyncError::MissingPrimaryKey { table }
            | SyncError::SchemaFetchFailure { table, .. }
            | SyncError::CreateTableFailure { table, .. }
            | SyncError::SourceReadFailure { table, .. }
            | SyncError::WatermarkExpired { table, .. }
            | SyncError::InvalidRow { table, .. }
            | SyncError::LoadFailure { table, .. }
            | SyncError::DeleteFailure { table, .. }
            | SyncError::CheckpointWriteFailure { table, .. } => Some(table),
        }
    }

    /// Short machine-friendly name of the error kind, used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::ConnectionFailure { .. } => "connection_failure",
            SyncError::ChangeTrackingUnavailable { .. } => "change_tracking_unavailable",
            SyncError::MissingPrimaryKey { .. } => "missing_primary_key",
            SyncError::SchemaFetchFailure { .. } => "schema_fetch_failure",
            SyncError::CreateTableFailure { .. } => "create_table_failure",
            SyncError::SourceReadFailure { .. } => "source_read_failure",
            SyncError::WatermarkExpired { .. } => "watermark_expired",
            SyncError::InvalidRow { .. } => "invalid_row",
            SyncError::LoadFailure { .. } => "load_failure",
            SyncError::DeleteFailure { .. } => "delete_failure",
            SyncError::CheckpointWriteFailure { .. } => "checkpoint_write_failure",
        }
    }
}

/// Invalid or missing configuration, detected before any connection attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SQL Server configuration is missing: {0} must be set")]
    MissingSource(&'static str),

    #[error("BigQuery configuration is missing: {0} must be set")]
    MissingTarget(&'static str),

    #[error("No tables specified for replication (set TABLES_TO_REPLICATE)")]
    NoTables,

    #[error("Invalid table name '{name}': {reason}")]
    InvalidTableName { name: String, reason: String },

    #[error("Table '{0}' is listed more than once")]
    DuplicateTable(String),

    #[error("Batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("Invalid SQL Server address '{0}': expected host or host,port")]
    InvalidSourceAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_scoped_errors_report_table() {
        let err = SyncError::MissingPrimaryKey {
            table: "audit_log".to_string(),
        };
        assert_eq!(err.table(), Some("audit_log"));
        assert_eq!(err.kind(), "missing_primary_key");

        let err = SyncError::ConnectionFailure {
            endpoint: "sqlserver".to_string(),
            source: anyhow::anyhow!("refused"),
        };
        assert_eq!(err.table(), None);
    }

    #[test]
    fn test_source_chain_is_preserved() {
        let err = SyncError::LoadFailure {
            table: "orders".to_string(),
            source: anyhow::anyhow!("quota exceeded").context("load job failed"),
        };
        let rendered = format!("{:?}", anyhow::Error::from(err));
        assert!(rendered.contains("failed to load rows into orders"));
        assert!(rendered.contains("quota exceeded"));
    }
}
