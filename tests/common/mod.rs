// ABOUTME: In-memory source and warehouse used by the integration tests
// ABOUTME: Both record the calls made against them so tests can assert on batching and ordering

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use ct_replicator::source::{PageRequest, SourceDatabase};
use ct_replicator::sync::loader::build_delete_predicate;
use ct_replicator::sync::schema::TargetSchema;
use ct_replicator::target::{TargetWarehouse, WriteDisposition};
use ct_replicator::types::{
    ChangeOperation, ChangeRecord, ColumnDescriptor, Row, SqlValue, TableDescriptor,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

pub struct MemoryTable {
    pub descriptor: TableDescriptor,
    pub rows: Vec<Row>,
    pub change_tracking: bool,
}

#[derive(Default)]
pub struct MemorySource {
    pub tables: HashMap<String, MemoryTable>,
    pub changes: HashMap<String, Vec<ChangeRecord>>,
    pub version: u64,
    pub min_valid: HashMap<String, u64>,
    pub page_requests: Vec<(String, PageRequest)>,
    pub change_reads: Vec<(String, u64, u64)>,
    pub fail_describe: HashSet<String>,
}

impl MemorySource {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn add_table(&mut self, descriptor: TableDescriptor, rows: Vec<Row>) {
        self.tables.insert(
            descriptor.name.clone(),
            MemoryTable {
                descriptor,
                rows,
                change_tracking: true,
            },
        );
    }

    pub fn disable_change_tracking(&mut self, table: &str) {
        if let Some(t) = self.tables.get_mut(table) {
            t.change_tracking = false;
        }
    }

    /// Record a change at the next version, applying it to the table content.
    pub fn record(&mut self, table: &str, operation: ChangeOperation, row: Row) -> u64 {
        self.version += 1;
        let version = self.version;
        let t = self.tables.get_mut(table).expect("unknown table");
        let key = row.project(&t.descriptor.primary_key).expect("key columns");

        t.rows.retain(|r| {
            r.project(&t.descriptor.primary_key).ok().as_ref() != Some(&key)
        });
        if operation != ChangeOperation::Delete {
            t.rows.push(row);
        }

        self.changes.entry(table.to_string()).or_default().push(ChangeRecord {
            operation,
            version,
            key,
            row: None,
        });
        version
    }

    pub fn page_sizes(&self, table: &str) -> Vec<usize> {
        self.page_requests
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, r)| r.limit())
            .collect()
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        match self.tables.get(name) {
            Some(t) => Ok(t),
            None => bail!("Table {} not found", name),
        }
    }
}

/// Ordering of key tuples for the values the tests use.
pub fn compare_keys(a: &[SqlValue], b: &[SqlValue]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = match (x, y) {
            (SqlValue::Int(x), SqlValue::Int(y)) => x.cmp(y),
            (SqlValue::String(x), SqlValue::String(y)) => x.cmp(y),
            _ => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl SourceDatabase for MemorySource {
    async fn change_tracking_enabled(&mut self, table: &str) -> Result<bool> {
        Ok(self.table(table)?.change_tracking)
    }

    async fn describe_table(&mut self, table: &str) -> Result<TableDescriptor> {
        if self.fail_describe.contains(table) {
            bail!("permission denied on sys.columns");
        }
        Ok(self.table(table)?.descriptor.clone())
    }

    async fn current_version(&mut self) -> Result<u64> {
        Ok(self.version)
    }

    async fn min_valid_version(&mut self, table: &str) -> Result<Option<u64>> {
        Ok(self.min_valid.get(table).copied())
    }

    async fn read_changes(
        &mut self,
        table: &TableDescriptor,
        since: u64,
        until: u64,
    ) -> Result<Vec<ChangeRecord>> {
        self.change_reads.push((table.name.clone(), since, until));
        let t = self.table(&table.name)?;
        let records = self.changes.get(&table.name).cloned().unwrap_or_default();
        Ok(records
            .into_iter()
            .filter(|r| r.version > since && r.version <= until)
            .map(|mut r| {
                // Current content of the row, as the LEFT JOIN would return it
                r.row = t
                    .rows
                    .iter()
                    .find(|row| row.project(&table.primary_key).ok().as_ref() == Some(&r.key))
                    .cloned();
                r
            })
            .collect())
    }

    async fn read_page(&mut self, table: &TableDescriptor, request: &PageRequest) -> Result<Vec<Row>> {
        self.page_requests.push((table.name.clone(), request.clone()));
        let t = self.table(&table.name)?;
        match request {
            PageRequest::Keyed {
                key_columns,
                after,
                limit,
            } => {
                let mut rows: Vec<(Vec<SqlValue>, Row)> = t
                    .rows
                    .iter()
                    .map(|r| Ok((r.key_values(key_columns)?, r.clone())))
                    .collect::<Result<_>>()?;
                rows.sort_by(|a, b| compare_keys(&a.0, &b.0));
                Ok(rows
                    .into_iter()
                    .filter(|(k, _)| match after {
                        Some(after) => compare_keys(k, after) == Ordering::Greater,
                        None => true,
                    })
                    .take(*limit)
                    .map(|(_, r)| r)
                    .collect())
            }
            PageRequest::Offset { offset, limit, .. } => Ok(t
                .rows
                .iter()
                .skip(*offset as usize)
                .take(*limit)
                .cloned()
                .collect()),
        }
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        Ok(self.table(table)?.rows.len() as u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadCall {
    pub table: String,
    pub rows: usize,
    pub disposition: WriteDisposition,
}

/// Warehouse holding tables as row vectors.
///
/// Deletes understand the predicates the loader builds: `TRUE`, or a
/// disjunction of per-key clauses matched against each row's own clause.
#[derive(Default)]
pub struct MemoryWarehouse {
    pub tables: Mutex<BTreeMap<String, Vec<Row>>>,
    pub schemas: Mutex<HashMap<String, TargetSchema>>,
    pub key_columns: Mutex<HashMap<String, Vec<String>>>,
    pub loads: Mutex<Vec<LoadCall>>,
    pub deletes: Mutex<Vec<(String, String)>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_loads: Mutex<HashSet<String>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn loads_for(&self, table: &str) -> Vec<LoadCall> {
        self.loads
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.table == table)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_loads_for(&self, table: &str) {
        self.fail_loads.lock().unwrap().insert(table.to_string());
    }

    /// Pre-create a table, as if left over from an earlier run.
    pub fn seed_table(&self, table: &str, key_columns: &[&str], rows: Vec<Row>) {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
        self.key_columns.lock().unwrap().insert(
            table.to_string(),
            key_columns.iter().map(|k| k.to_string()).collect(),
        );
    }
}

#[async_trait]
impl TargetWarehouse for MemoryWarehouse {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.lock().unwrap().contains_key(table))
    }

    async fn create_table(&self, table: &str, schema: &TargetSchema) -> Result<()> {
        self.calls.lock().unwrap().push(format!("create {}", table));
        self.schemas
            .lock()
            .unwrap()
            .insert(table.to_string(), schema.clone());
        self.key_columns
            .lock()
            .unwrap()
            .insert(table.to_string(), schema.clustering.clone());
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn load_rows(
        &self,
        table: &str,
        rows: &[Row],
        disposition: WriteDisposition,
    ) -> Result<u64> {
        if self.fail_loads.lock().unwrap().contains(table) {
            bail!("quota exceeded for table {}", table);
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("load {} {}", table, disposition));
        self.loads.lock().unwrap().push(LoadCall {
            table: table.to_string(),
            rows: rows.len(),
            disposition,
        });

        let mut tables = self.tables.lock().unwrap();
        let Some(existing) = tables.get_mut(table) else {
            bail!("Table {} does not exist", table);
        };
        if disposition == WriteDisposition::Replace {
            existing.clear();
        }
        existing.extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn delete_where(&self, table: &str, predicate: &str) -> Result<u64> {
        self.calls.lock().unwrap().push(format!("delete {}", table));
        self.deletes
            .lock()
            .unwrap()
            .push((table.to_string(), predicate.to_string()));

        let key_columns = self
            .key_columns
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default();
        let mut tables = self.tables.lock().unwrap();
        let Some(existing) = tables.get_mut(table) else {
            bail!("Table {} does not exist", table);
        };

        let before = existing.len();
        if predicate == "TRUE" {
            existing.clear();
        } else {
            let clauses: HashSet<&str> = predicate.split(" OR ").collect();
            existing.retain(|row| {
                let clause = build_delete_predicate(&key_columns, std::slice::from_ref(row))
                    .unwrap_or_default();
                !clauses.contains(clause.as_str())
            });
        }
        Ok((before - existing.len()) as u64)
    }
}

pub fn orders_table() -> TableDescriptor {
    TableDescriptor::new(
        "orders",
        vec![
            ColumnDescriptor::new("id", "int", false),
            ColumnDescriptor::new("customer", "nvarchar", true),
            ColumnDescriptor::new("total", "decimal", true),
        ],
        vec!["id".to_string()],
    )
    .unwrap()
}

pub fn order(id: i64, customer: &str) -> Row {
    Row::new()
        .with("id", id)
        .with("customer", customer)
        .with("total", SqlValue::Null)
}

pub fn orders(count: i64) -> Vec<Row> {
    (1..=count).map(|i| order(i, "acme")).collect()
}

pub fn audit_log_table() -> TableDescriptor {
    TableDescriptor::new(
        "audit_log",
        vec![
            ColumnDescriptor::new("message", "nvarchar", true),
            ColumnDescriptor::new("payload", "ntext", true),
        ],
        vec![],
    )
    .unwrap()
}

pub fn audit_entries(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            Row::new()
                .with("message", format!("event {}", i))
                .with("payload", SqlValue::Null)
        })
        .collect()
}

pub fn ids(rows: &[Row]) -> Vec<i64> {
    let mut ids: Vec<i64> = rows
        .iter()
        .filter_map(|r| match r.get("id") {
            Some(SqlValue::Int(i)) => Some(*i),
            _ => None,
        })
        .collect();
    ids.sort();
    ids
}
