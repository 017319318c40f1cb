// ABOUTME: Applies change sets to the target warehouse
// ABOUTME: Bulk loads with replace/append disposition and single-statement deletes by primary key

use chrono::SecondsFormat;

use crate::error::SyncError;
use crate::target::{TargetWarehouse, WriteDisposition};
use crate::types::{Row, SqlValue};
use crate::utils::quote_bq_ident;

/// Writes rows to, and deletes rows from, target tables.
pub struct Loader<'a, T: TargetWarehouse + ?Sized> {
    target: &'a T,
}

impl<'a, T: TargetWarehouse + ?Sized> Loader<'a, T> {
    pub fn new(target: &'a T) -> Self {
        Self { target }
    }

    /// Load `rows` into `table`. An empty batch is a no-op.
    ///
    /// The target has no native upsert, so `Append` of a row that already
    /// exists leaves a duplicate behind.
    pub async fn apply_upserts(
        &self,
        table: &str,
        rows: &[Row],
        disposition: WriteDisposition,
    ) -> Result<u64, SyncError> {
        if rows.is_empty() {
            return Ok(0);
        }

        tracing::debug!("Loading {} rows into {} ({})", rows.len(), table, disposition);
        self.target
            .load_rows(table, rows, disposition)
            .await
            .map_err(|source| SyncError::LoadFailure {
                table: table.to_string(),
                source,
            })
    }

    /// Delete every row whose primary key matches one of `keys`, in one
    /// statement. An empty key set is a no-op. Deleting an absent key is not
    /// an error.
    pub async fn apply_deletes(
        &self,
        table: &str,
        key_columns: &[String],
        keys: &[Row],
    ) -> Result<u64, SyncError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let delete_failure = |source: anyhow::Error| SyncError::DeleteFailure {
            table: table.to_string(),
            source,
        };

        let predicate = build_delete_predicate(key_columns, keys).map_err(delete_failure)?;
        tracing::debug!("Deleting {} keys from {}", keys.len(), table);
        self.target
            .delete_where(table, &predicate)
            .await
            .map_err(delete_failure)
    }

    /// Remove every row of `table`.
    pub async fn clear_table(&self, table: &str) -> Result<u64, SyncError> {
        self.target
            .delete_where(table, "TRUE")
            .await
            .map_err(|source| SyncError::DeleteFailure {
                table: table.to_string(),
                source,
            })
    }
}

/// Build `(k1 = v1 AND k2 = v2) OR (...)` for a set of key rows.
///
/// NULL key components compare with `IS NULL`.
pub fn build_delete_predicate(key_columns: &[String], keys: &[Row]) -> anyhow::Result<String> {
    anyhow::ensure!(!key_columns.is_empty(), "Cannot delete by key without key columns");

    let mut clauses = Vec::with_capacity(keys.len());
    for key in keys {
        let values = key.key_values(key_columns)?;
        let conditions: Vec<String> = key_columns
            .iter()
            .zip(values.iter())
            .map(|(column, value)| {
                if value.is_null() {
                    format!("{} IS NULL", quote_bq_ident(column))
                } else {
                    format!("{} = {}", quote_bq_ident(column), sql_literal(value))
                }
            })
            .collect();
        clauses.push(format!("({})", conditions.join(" AND ")));
    }

    Ok(clauses.join(" OR "))
}

/// Render a value as a GoogleSQL literal.
pub fn sql_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(true) => "TRUE".to_string(),
        SqlValue::Bool(false) => "FALSE".to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) if f.is_nan() => "CAST('NaN' AS FLOAT64)".to_string(),
        SqlValue::Float(f) if f.is_infinite() => {
            let sign = if *f > 0.0 { "" } else { "-" };
            format!("CAST('{}inf' AS FLOAT64)", sign)
        }
        SqlValue::Float(f) => format!("{:?}", f),
        SqlValue::Decimal(d) => format!("NUMERIC '{}'", d),
        SqlValue::String(s) => string_literal(s),
        SqlValue::Uuid(u) => string_literal(&u.to_string()),
        SqlValue::Bytes(bytes) => {
            use base64::Engine;
            format!(
                "FROM_BASE64('{}')",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            )
        }
        SqlValue::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
        SqlValue::Time(t) => format!("TIME '{}'", t.format("%H:%M:%S%.6f")),
        SqlValue::DateTime(dt) => format!("DATETIME '{}'", dt.format("%Y-%m-%d %H:%M:%S%.6f")),
        SqlValue::Timestamp(ts) => format!(
            "TIMESTAMP '{}'",
            ts.to_rfc3339_opts(SecondsFormat::Micros, true)
        ),
    }
}

fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}
