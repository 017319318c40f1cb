// ABOUTME: Converts between tiberius column data and the engine's typed values
// ABOUTME: Result rows become Row maps; SqlValue binds as a query parameter

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::borrow::Cow;
use tiberius::{ColumnData, FromSql, ToSql};

use crate::types::{Row, SqlValue};

/// Convert one column value.
pub fn column_to_value(data: &ColumnData<'static>) -> Result<SqlValue> {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| SqlValue::Int(v.into())),
        ColumnData::I16(v) => v.map(|v| SqlValue::Int(v.into())),
        ColumnData::I32(v) => v.map(|v| SqlValue::Int(v.into())),
        ColumnData::I64(v) => v.map(SqlValue::Int),
        ColumnData::F32(v) => v.map(|v| SqlValue::Float(v.into())),
        ColumnData::F64(v) => v.map(SqlValue::Float),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::String(s.to_string())),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Bytes(b.to_vec())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|xml| SqlValue::String((**xml).clone().into_string())),
        ColumnData::Numeric(_) => Decimal::from_sql(data)
            .context("Failed to convert NUMERIC value")?
            .map(SqlValue::Decimal),
        ColumnData::Date(_) => NaiveDate::from_sql(data)
            .context("Failed to convert DATE value")?
            .map(SqlValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(data)
            .context("Failed to convert TIME value")?
            .map(SqlValue::Time),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)
                .context("Failed to convert DATETIME value")?
                .map(SqlValue::DateTime)
        }
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(data)
            .context("Failed to convert DATETIMEOFFSET value")?
            .map(|ts| SqlValue::Timestamp(ts.with_timezone(&Utc))),
        #[allow(unreachable_patterns)]
        other => bail!("Unsupported SQL Server column data: {:?}", other),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// Convert a result row, keeping every column under its result name.
pub fn row_to_values(row: tiberius::Row) -> Result<Vec<(String, SqlValue)>> {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    names
        .into_iter()
        .zip(row)
        .map(|(name, data)| {
            let value = column_to_value(&data)
                .with_context(|| format!("Failed to read column '{}'", name))?;
            Ok((name, value))
        })
        .collect()
}

/// Convert a result row into a `Row`.
pub fn to_row(row: tiberius::Row) -> Result<Row> {
    Ok(row_to_values(row)?.into_iter().collect())
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlValue::Null => ColumnData::String(None),
            SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
            SqlValue::Int(i) => ColumnData::I64(Some(*i)),
            SqlValue::Float(f) => ColumnData::F64(Some(*f)),
            SqlValue::Decimal(d) => d.to_sql(),
            SqlValue::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            SqlValue::Bytes(b) => ColumnData::Binary(Some(Cow::Borrowed(b.as_slice()))),
            SqlValue::Uuid(u) => ColumnData::Guid(Some(*u)),
            SqlValue::Date(d) => d.to_sql(),
            SqlValue::Time(t) => t.to_sql(),
            SqlValue::DateTime(dt) => dt.to_sql(),
            SqlValue::Timestamp(ts) => ts.to_sql(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widths_widen_to_i64() {
        assert_eq!(column_to_value(&ColumnData::U8(Some(7))).unwrap(), SqlValue::Int(7));
        assert_eq!(column_to_value(&ColumnData::I16(Some(-3))).unwrap(), SqlValue::Int(-3));
        assert_eq!(
            column_to_value(&ColumnData::I64(Some(i64::MAX))).unwrap(),
            SqlValue::Int(i64::MAX)
        );
    }

    #[test]
    fn test_nulls_of_any_type() {
        assert_eq!(column_to_value(&ColumnData::I32(None)).unwrap(), SqlValue::Null);
        assert_eq!(column_to_value(&ColumnData::String(None)).unwrap(), SqlValue::Null);
        assert_eq!(column_to_value(&ColumnData::Binary(None)).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_strings_and_bytes() {
        let s = ColumnData::String(Some(Cow::Owned("héllo".to_string())));
        assert_eq!(column_to_value(&s).unwrap(), SqlValue::String("héllo".to_string()));

        let b = ColumnData::Binary(Some(Cow::Owned(vec![0xde, 0xad])));
        assert_eq!(column_to_value(&b).unwrap(), SqlValue::Bytes(vec![0xde, 0xad]));
    }

    #[test]
    fn test_value_binds_as_matching_column_data() {
        assert!(matches!(SqlValue::Int(5).to_sql(), ColumnData::I64(Some(5))));
        assert!(matches!(
            SqlValue::String("x".to_string()).to_sql(),
            ColumnData::String(Some(_))
        ));
        assert!(matches!(SqlValue::Bool(true).to_sql(), ColumnData::Bit(Some(true))));
    }
}
