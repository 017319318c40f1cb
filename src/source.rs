// ABOUTME: Source query interface used by the sync engine
// ABOUTME: Introspection, change-feed reads and paged row retrieval for one source database

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{ChangeRecord, Row, SqlValue, TableDescriptor};

/// One page request issued by the pager.
#[derive(Debug, Clone, PartialEq)]
pub enum PageRequest {
    /// Rows strictly greater than `after` in key order, ascending by key.
    /// `after` is `None` for the first page.
    Keyed {
        key_columns: Vec<String>,
        after: Option<Vec<SqlValue>>,
        limit: usize,
    },
    /// Rows `offset..offset + limit` under a stable ordering on `order_by`.
    Offset {
        order_by: Vec<String>,
        offset: u64,
        limit: usize,
    },
}

impl PageRequest {
    pub fn limit(&self) -> usize {
        match self {
            PageRequest::Keyed { limit, .. } | PageRequest::Offset { limit, .. } => *limit,
        }
    }
}

/// A source database exposing a per-table change feed.
///
/// Methods take `&mut self` because a single connection serves every query
/// of a run, one at a time.
#[async_trait]
pub trait SourceDatabase: Send {
    /// Whether change tracking is enabled for `table`.
    async fn change_tracking_enabled(&mut self, table: &str) -> Result<bool>;

    /// Columns (in ordinal order) and primary key (in key order) of `table`.
    async fn describe_table(&mut self, table: &str) -> Result<TableDescriptor>;

    /// The change feed's current version for the database.
    async fn current_version(&mut self) -> Result<u64>;

    /// Oldest version the feed can still answer for `table`, if known.
    async fn min_valid_version(&mut self, table: &str) -> Result<Option<u64>>;

    /// Change records with versions in `(since, until]`.
    ///
    /// Records carry the primary key always and the current row content for
    /// rows that still exist in the source.
    async fn read_changes(
        &mut self,
        table: &TableDescriptor,
        since: u64,
        until: u64,
    ) -> Result<Vec<ChangeRecord>>;

    /// One page of full rows.
    async fn read_page(&mut self, table: &TableDescriptor, request: &PageRequest)
        -> Result<Vec<Row>>;

    /// Row count, used to size progress reporting.
    async fn count_rows(&mut self, table: &str) -> Result<u64>;
}
