// ABOUTME: Target load interface used by the sync engine
// ABOUTME: Table creation, bulk loads with a write disposition and delete-by-predicate

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

use crate::sync::schema::TargetSchema;
use crate::types::Row;

/// Whether a bulk load replaces the table content or appends to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    Replace,
    Append,
}

impl WriteDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteDisposition::Replace => "replace",
            WriteDisposition::Append => "append",
        }
    }
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An analytical warehouse that receives replicated tables.
#[async_trait]
pub trait TargetWarehouse: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Create `table` with the given schema and clustering hints.
    async fn create_table(&self, table: &str, schema: &TargetSchema) -> Result<()>;

    /// Bulk-load `rows`. Returns the number of rows written.
    async fn load_rows(&self, table: &str, rows: &[Row], disposition: WriteDisposition)
        -> Result<u64>;

    /// Delete every row matching `predicate`, a boolean SQL expression in the
    /// warehouse's dialect. Returns the number of rows removed when known.
    async fn delete_where(&self, table: &str, predicate: &str) -> Result<u64>;
}
