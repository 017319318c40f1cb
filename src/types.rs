// ABOUTME: Core data model shared by the sync engine and the database drivers
// ABOUTME: Table/column descriptors, typed row values, change-feed records and change sets

use anyhow::{bail, ensure, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::collections::btree_map;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single column as reported by source introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Source-native type name (e.g. `nvarchar`, `datetime2`)
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// Shape of a source table for one sync pass.
///
/// Fetched fresh at the start of every pass. `primary_key` is ordered by key
/// position and is always a subset of `columns`; it is empty only for tables
/// without a primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
}

impl TableDescriptor {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
        primary_key: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        ensure!(!columns.is_empty(), "Table {} has no columns", name);
        for key in &primary_key {
            ensure!(
                columns.iter().any(|c| &c.name == key),
                "Primary key column '{}' is not a column of table {}",
                key,
                name
            );
        }
        Ok(Self {
            name,
            columns,
            primary_key,
        })
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A typed column value carried between source and target.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int",
            SqlValue::Float(_) => "float",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::String(_) => "string",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::Timestamp(_) => "timestamp",
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value.into())
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::String(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::String(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One row keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for tests and fixtures.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, SqlValue> {
        self.values.iter()
    }

    /// Copy out the given columns, in order. Missing columns are an error.
    pub fn project(&self, columns: &[String]) -> Result<Row> {
        let mut projected = Row::new();
        for column in columns {
            match self.values.get(column) {
                Some(value) => projected.insert(column.clone(), value.clone()),
                None => bail!("Row has no value for column '{}'", column),
            }
        }
        Ok(projected)
    }

    /// Key values in key-column order.
    pub fn key_values(&self, key_columns: &[String]) -> Result<Vec<SqlValue>> {
        key_columns
            .iter()
            .map(|column| {
                self.values
                    .get(column)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("Row has no value for key column '{}'", column))
            })
            .collect()
    }

    /// Check a full row against the table it claims to belong to.
    pub fn validate(&self, table: &TableDescriptor) -> Result<()> {
        for (name, value) in &self.values {
            let Some(column) = table.column(name) else {
                bail!("Column '{}' does not exist in table {}", name, table.name);
            };
            if value.is_null() && !column.nullable {
                bail!(
                    "Column '{}' of table {} is NOT NULL but the row carries NULL",
                    name,
                    table.name
                );
            }
        }
        for column in &table.columns {
            ensure!(
                self.values.contains_key(&column.name),
                "Row is missing column '{}' of table {}",
                column.name,
                table.name
            );
        }
        Ok(())
    }

    /// Check a key-only row (as carried by deletes) against the table's primary key.
    pub fn validate_key(&self, table: &TableDescriptor) -> Result<()> {
        ensure!(
            self.values.len() == table.primary_key.len(),
            "Key row for table {} has {} values, primary key has {} columns",
            table.name,
            self.values.len(),
            table.primary_key.len()
        );
        for key in &table.primary_key {
            ensure!(
                self.values.contains_key(key),
                "Key row for table {} is missing key column '{}'",
                table.name,
                key
            );
        }
        Ok(())
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Row {
    type Item = (String, SqlValue);
    type IntoIter = btree_map::IntoIter<String, SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = (&'a String, &'a SqlValue);
    type IntoIter = btree_map::Iter<'a, String, SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Row-level operation recorded by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "I",
            ChangeOperation::Update => "U",
            ChangeOperation::Delete => "D",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code.trim() {
            "I" => Ok(ChangeOperation::Insert),
            "U" => Ok(ChangeOperation::Update),
            "D" => Ok(ChangeOperation::Delete),
            other => bail!("unknown change operation: {other}"),
        }
    }
}

/// One entry of the change feed for a version range.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub operation: ChangeOperation,
    pub version: u64,
    /// Primary-key values of the changed row
    pub key: Row,
    /// Current row content; `None` for deletes, or when the row has since
    /// disappeared from the source
    pub row: Option<Row>,
}

/// Net effect of the change feed between a watermark and `new_version`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeSet {
    pub upserts: Vec<Row>,
    /// Key-only rows
    pub deletes: Vec<Row>,
    pub new_version: u64,
}

impl ChangeSet {
    pub fn empty(new_version: u64) -> Self {
        Self {
            upserts: Vec::new(),
            deletes: Vec::new(),
            new_version,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}
