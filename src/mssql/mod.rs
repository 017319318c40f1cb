// ABOUTME: SQL Server source driver built on tiberius
// ABOUTME: Connection setup with retry and the SourceDatabase implementation

pub mod convert;
pub mod queries;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::SourceConfig;
use crate::error::SyncError;
use crate::source::{PageRequest, SourceDatabase};
use crate::types::{ChangeOperation, ChangeRecord, ColumnDescriptor, Row, SqlValue, TableDescriptor};
use crate::utils::{retry_with_backoff, RetryPolicy};

const CONNECT_POLICY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1));

/// A single SQL Server connection used for every query of a run.
pub struct SqlServerSource {
    client: Client<Compat<TcpStream>>,
}

impl SqlServerSource {
    /// Connect, retrying transient failures with exponential backoff.
    pub async fn connect(config: &SourceConfig) -> Result<Self, SyncError> {
        let endpoint = config.endpoint();
        tracing::info!("Connecting to SQL Server at {}", endpoint);

        let client = retry_with_backoff("SQL Server login", CONNECT_POLICY, || connect_once(config))
            .await
            .map_err(|source| SyncError::ConnectionFailure {
                endpoint: endpoint.clone(),
                source,
            })?;

        tracing::info!("Connected to SQL Server at {}", endpoint);
        Ok(Self { client })
    }

    /// Run a statement batch, returning the total rows affected.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        let result = self
            .client
            .execute(sql, &[])
            .await
            .with_context(|| format!("Statement failed: {}", first_line(sql)))?;
        Ok(result.total())
    }

    async fn query(&mut self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<tiberius::Row>> {
        let stream = self
            .client
            .query(sql, params)
            .await
            .with_context(|| format!("Query failed: {}", first_line(sql)))?;
        stream
            .into_first_result()
            .await
            .with_context(|| format!("Failed to read results of: {}", first_line(sql)))
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .query(queries::PRIMARY_KEY_COLUMNS, &[&table])
            .await
            .with_context(|| format!("Failed to read primary key of {}", table))?;
        rows.iter()
            .map(|row| {
                row.try_get::<&str, _>("column_name")?
                    .map(str::to_string)
                    .context("NULL primary key column name")
            })
            .collect()
    }
}

async fn connect_once(config: &SourceConfig) -> Result<Client<Compat<TcpStream>>> {
    let mut tds = Config::new();
    tds.host(&config.host);
    tds.port(config.port);
    tds.database(&config.database);
    tds.authentication(AuthMethod::sql_server(&config.username, &config.password));
    if config.trust_cert {
        tds.trust_cert();
    }

    let tcp = TcpStream::connect(tds.get_addr())
        .await
        .with_context(|| format!("Failed to open TCP connection to {}", tds.get_addr()))?;
    tcp.set_nodelay(true)?;

    Client::connect(tds, tcp.compat_write())
        .await
        .context("SQL Server login failed")
}

fn first_line(sql: &str) -> &str {
    let line = sql.lines().next().unwrap_or_default();
    match line.char_indices().nth(120) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

fn version_from_row(row: Option<&tiberius::Row>, what: &str) -> Result<Option<u64>> {
    let Some(row) = row else {
        return Ok(None);
    };
    match row.try_get::<i64, _>(0)? {
        Some(v) if v < 0 => bail!("{} is negative: {}", what, v),
        Some(v) => Ok(Some(v as u64)),
        None => Ok(None),
    }
}

#[async_trait]
impl SourceDatabase for SqlServerSource {
    async fn change_tracking_enabled(&mut self, table: &str) -> Result<bool> {
        let rows = self
            .query(queries::CHANGE_TRACKING_ENABLED, &[&table])
            .await?;
        let Some(row) = rows.first() else {
            bail!("Table {} not found in the source database", table);
        };
        Ok(row.try_get::<bool, _>("enabled")?.unwrap_or(false))
    }

    async fn describe_table(&mut self, table: &str) -> Result<TableDescriptor> {
        let rows = self
            .query(queries::TABLE_COLUMNS, &[&table])
            .await
            .with_context(|| format!("Failed to read columns of {}", table))?;
        if rows.is_empty() {
            bail!("Table {} not found in the source database", table);
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = row
                .try_get::<&str, _>("column_name")?
                .context("NULL column name")?;
            let data_type = row
                .try_get::<&str, _>("data_type")?
                .context("NULL column type")?;
            let nullable = row.try_get::<bool, _>("is_nullable")?.unwrap_or(true);
            columns.push(ColumnDescriptor::new(name, data_type, nullable));
        }

        let primary_key = self.primary_key(table).await?;
        TableDescriptor::new(table, columns, primary_key)
    }

    async fn current_version(&mut self) -> Result<u64> {
        let rows = self.query(queries::CURRENT_VERSION, &[]).await?;
        version_from_row(rows.first(), "CHANGE_TRACKING_CURRENT_VERSION()")?
            .context("Change tracking is not enabled for the source database")
    }

    async fn min_valid_version(&mut self, table: &str) -> Result<Option<u64>> {
        let rows = self.query(queries::MIN_VALID_VERSION, &[&table]).await?;
        version_from_row(rows.first(), "CHANGE_TRACKING_MIN_VALID_VERSION()")
    }

    async fn read_changes(
        &mut self,
        table: &TableDescriptor,
        since: u64,
        until: u64,
    ) -> Result<Vec<ChangeRecord>> {
        let sql = queries::changes_query(table);
        let since = i64::try_from(since).context("watermark exceeds BIGINT")?;
        let until = i64::try_from(until).context("version exceeds BIGINT")?;
        let rows = self
            .query(&sql, &[&since, &until])
            .await
            .with_context(|| format!("Failed to read change table of {}", table.name))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(change_record(table, convert::row_to_values(row)?)?);
        }
        Ok(records)
    }

    async fn read_page(&mut self, table: &TableDescriptor, request: &PageRequest) -> Result<Vec<Row>> {
        let columns = &table.columns;
        let (sql, params) = match request {
            PageRequest::Keyed {
                key_columns,
                after,
                limit,
            } => (
                queries::keyed_page_query(&table.name, columns, key_columns, after.is_some(), *limit),
                after.clone().unwrap_or_default(),
            ),
            PageRequest::Offset {
                order_by,
                offset,
                limit,
            } => (
                queries::offset_page_query(&table.name, columns, order_by, *offset, *limit),
                Vec::new(),
            ),
        };

        let bound: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let rows = self
            .query(&sql, &bound)
            .await
            .with_context(|| format!("Failed to read page of {}", table.name))?;
        rows.into_iter().map(convert::to_row).collect()
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        let rows = self.query(&queries::count_query(table), &[]).await?;
        version_from_row(rows.first(), "COUNT_BIG(*)")?.context("COUNT_BIG returned no row")
    }
}

/// Split one change-table result row into operation, version, key and row content.
fn change_record(table: &TableDescriptor, values: Vec<(String, SqlValue)>) -> Result<ChangeRecord> {
    let mut operation = None;
    let mut version = None;
    let mut key = Row::new();
    let mut content = Row::new();

    for (name, value) in values {
        if name == queries::OPERATION_COLUMN {
            let SqlValue::String(code) = value else {
                bail!("Unexpected change operation value: {:?}", value);
            };
            operation = Some(ChangeOperation::from_code(&code)?);
        } else if name == queries::VERSION_COLUMN {
            let SqlValue::Int(v) = value else {
                bail!("Unexpected change version value: {:?}", value);
            };
            version = Some(u64::try_from(v).context("negative change version")?);
        } else if let Some(index) = name.strip_prefix(queries::KEY_COLUMN_PREFIX) {
            let index: usize = index.parse().context("malformed key column alias")?;
            let column = table
                .primary_key
                .get(index)
                .context("key column alias out of range")?;
            key.insert(column.clone(), value);
        } else {
            content.insert(name, value);
        }
    }

    // Base-table key columns are NULL when the row no longer exists
    let present = table
        .primary_key
        .iter()
        .all(|k| content.get(k).map(|v| !v.is_null()).unwrap_or(false));

    Ok(ChangeRecord {
        operation: operation.context("change row has no operation")?,
        version: version.context("change row has no version")?,
        key,
        row: present.then_some(content),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableDescriptor {
        TableDescriptor::new(
            "orders",
            vec![
                ColumnDescriptor::new("id", "int", false),
                ColumnDescriptor::new("status", "nvarchar", true),
            ],
            vec!["id".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_change_record_for_update() {
        let values = vec![
            ("__ct_operation".to_string(), SqlValue::from("U")),
            ("__ct_version".to_string(), SqlValue::Int(52)),
            ("__ct_key_0".to_string(), SqlValue::Int(7)),
            ("id".to_string(), SqlValue::Int(7)),
            ("status".to_string(), SqlValue::from("paid")),
        ];
        let record = change_record(&orders(), values).unwrap();
        assert_eq!(record.operation, ChangeOperation::Update);
        assert_eq!(record.version, 52);
        assert_eq!(record.key, Row::new().with("id", 7));
        assert_eq!(
            record.row,
            Some(Row::new().with("id", 7).with("status", "paid"))
        );
    }

    #[test]
    fn test_change_record_for_delete_has_no_row() {
        let values = vec![
            ("__ct_operation".to_string(), SqlValue::from("D")),
            ("__ct_version".to_string(), SqlValue::Int(53)),
            ("__ct_key_0".to_string(), SqlValue::Int(3)),
            ("id".to_string(), SqlValue::Null),
            ("status".to_string(), SqlValue::Null),
        ];
        let record = change_record(&orders(), values).unwrap();
        assert_eq!(record.operation, ChangeOperation::Delete);
        assert_eq!(record.key, Row::new().with("id", 3));
        assert!(record.row.is_none());
    }

    #[test]
    fn test_first_line_truncates() {
        assert_eq!(first_line("SELECT 1\nFROM x"), "SELECT 1");
        assert_eq!(first_line(&"a".repeat(300)).len(), 120);
    }
}
