// ABOUTME: Library entry point for ct-replicator
// ABOUTME: Incremental SQL Server to BigQuery replication driven by change tracking

pub mod bigquery;
pub mod commands;
pub mod config;
pub mod error;
pub mod mssql;
pub mod source;
pub mod sync;
pub mod target;
pub mod types;
pub mod utils;

pub use config::ReplicatorConfig;
pub use error::{ConfigError, SyncError};
pub use source::{PageRequest, SourceDatabase};
pub use target::{TargetWarehouse, WriteDisposition};
pub use types::{
    ChangeOperation, ChangeRecord, ChangeSet, ColumnDescriptor, Row, SqlValue, TableDescriptor,
};
