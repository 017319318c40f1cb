// ABOUTME: Full ordered scan of a source table for the initial load
// ABOUTME: Keyed cursor pagination when a primary key exists, offset pagination otherwise

use super::schema::map_type;
use crate::error::SyncError;
use crate::source::{PageRequest, SourceDatabase};
use crate::types::{Row, SqlValue, TableDescriptor};

/// Large-object types that cannot appear in an ORDER BY clause. Types with no
/// native mapping (CLR types, sql_variant) are excluded as well.
const UNORDERABLE_TYPES: &[&str] = &["text", "ntext", "image", "xml"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagingMode {
    /// Cursor on the full primary key, ascending.
    Keyed { key_columns: Vec<String> },
    /// Increasing offsets under a stable ordering.
    ///
    /// Rows inserted or deleted in the source while the scan runs can shift
    /// offsets, so a row may be skipped or read twice. Only used for tables
    /// without a primary key.
    Offset { order_by: Vec<String> },
}

impl PagingMode {
    pub fn for_table(table: &TableDescriptor) -> Self {
        if table.has_primary_key() {
            PagingMode::Keyed {
                key_columns: table.primary_key.clone(),
            }
        } else {
            PagingMode::Offset {
                order_by: table
                    .columns
                    .iter()
                    .filter(|c| {
                        let ty = c.data_type.to_ascii_lowercase();
                        !UNORDERABLE_TYPES.contains(&ty.as_str()) && map_type(&ty).is_some()
                    })
                    .map(|c| c.name.clone())
                    .collect(),
            }
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, PagingMode::Keyed { .. })
    }
}

/// Scans a table from the start, one batch at a time.
///
/// A scan is finite and restartable only from the beginning: a failed page
/// ends the scan and the caller starts over with a new `Pager`.
pub struct Pager<'a, S: SourceDatabase + ?Sized> {
    source: &'a mut S,
    table: &'a TableDescriptor,
    batch_size: usize,
    mode: PagingMode,
    cursor: Option<Vec<SqlValue>>,
    offset: u64,
    exhausted: bool,
    pages_read: usize,
}

impl<'a, S: SourceDatabase + ?Sized> Pager<'a, S> {
    pub fn new(source: &'a mut S, table: &'a TableDescriptor, batch_size: usize) -> Self {
        Self {
            source,
            table,
            batch_size: batch_size.max(1),
            mode: PagingMode::for_table(table),
            cursor: None,
            offset: 0,
            exhausted: false,
            pages_read: 0,
        }
    }

    pub fn mode(&self) -> &PagingMode {
        &self.mode
    }

    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    /// Fetch the next batch, or `None` once the table is exhausted.
    ///
    /// The scan ends after the first batch shorter than the batch size.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Row>>, SyncError> {
        if self.exhausted {
            return Ok(None);
        }

        let request = match &self.mode {
            PagingMode::Keyed { key_columns } => PageRequest::Keyed {
                key_columns: key_columns.clone(),
                after: self.cursor.clone(),
                limit: self.batch_size,
            },
            PagingMode::Offset { order_by } => PageRequest::Offset {
                order_by: order_by.clone(),
                offset: self.offset,
                limit: self.batch_size,
            },
        };

        let rows = self
            .source
            .read_page(self.table, &request)
            .await
            .map_err(|source| SyncError::SourceReadFailure {
                table: self.table.name.clone(),
                source,
            })?;

        for row in &rows {
            row.validate(self.table)
                .map_err(|source| SyncError::InvalidRow {
                    table: self.table.name.clone(),
                    source,
                })?;
        }

        if rows.len() < self.batch_size {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        match &self.mode {
            PagingMode::Keyed { key_columns } => {
                // Validated above, so the key columns are present
                let last = rows.last().map(|row| row.key_values(key_columns));
                if let Some(key) = last {
                    self.cursor = Some(key.map_err(|source| SyncError::InvalidRow {
                        table: self.table.name.clone(),
                        source,
                    })?);
                }
            }
            PagingMode::Offset { .. } => {
                self.offset += rows.len() as u64;
            }
        }

        self.pages_read += 1;
        tracing::debug!(
            "Read page {} of {} ({} rows)",
            self.pages_read,
            self.table.name,
            rows.len()
        );

        Ok(Some(rows))
    }
}
