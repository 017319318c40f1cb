// ABOUTME: Encodes rows as newline-delimited JSON for BigQuery load jobs
// ABOUTME: BYTES as base64, INT64/NUMERIC as strings, temporal values in canonical formats

use anyhow::{Context, Result};
use base64::Engine;
use chrono::SecondsFormat;
use serde_json::Value as JsonValue;

use crate::types::{Row, SqlValue};

/// Convert a single value to its JSON load representation.
///
/// Integers and decimals are written as strings so values beyond 2^53 and
/// NUMERIC scale survive. Non-finite floats are written as the strings
/// BigQuery accepts for FLOAT64 (`NaN`, `Infinity`, `-Infinity`).
///
/// # Examples
///
/// ```
/// # use ct_replicator::bigquery::encode::value_to_json;
/// # use ct_replicator::types::SqlValue;
/// assert_eq!(value_to_json(&SqlValue::Int(42)), serde_json::json!("42"));
/// assert_eq!(value_to_json(&SqlValue::Bytes(vec![1, 2, 3])), serde_json::json!("AQID"));
/// ```
pub fn value_to_json(value: &SqlValue) -> JsonValue {
    match value {
        SqlValue::Null => JsonValue::Null,
        SqlValue::Bool(b) => JsonValue::Bool(*b),
        SqlValue::Int(i) => JsonValue::String(i.to_string()),
        SqlValue::Float(f) => match serde_json::Number::from_f64(*f) {
            Some(n) => JsonValue::Number(n),
            None if f.is_nan() => JsonValue::String("NaN".to_string()),
            None if *f > 0.0 => JsonValue::String("Infinity".to_string()),
            None => JsonValue::String("-Infinity".to_string()),
        },
        SqlValue::Decimal(d) => JsonValue::String(d.to_string()),
        SqlValue::String(s) => JsonValue::String(s.clone()),
        SqlValue::Uuid(u) => JsonValue::String(u.to_string()),
        SqlValue::Bytes(b) => {
            JsonValue::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        SqlValue::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => JsonValue::String(t.format("%H:%M:%S%.6f").to_string()),
        SqlValue::DateTime(dt) => {
            JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
        }
        SqlValue::Timestamp(ts) => {
            JsonValue::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
        }
    }
}

pub fn row_to_json(row: &Row) -> JsonValue {
    let object: serde_json::Map<String, JsonValue> = row
        .iter()
        .map(|(column, value)| (column.clone(), value_to_json(value)))
        .collect();
    JsonValue::Object(object)
}

/// Serialize rows as newline-delimited JSON.
pub fn rows_to_ndjson(rows: &[Row]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(rows.len() * 64);
    for (i, row) in rows.iter().enumerate() {
        serde_json::to_writer(&mut out, &row_to_json(row))
            .with_context(|| format!("Failed to encode row {} as JSON", i))?;
        out.push(b'\n');
    }
    Ok(out)
}
