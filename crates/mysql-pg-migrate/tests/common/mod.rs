//! In-memory source and target databases for driving the engine in tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use mysql_pg_migrate::{
    Catalog, ColumnDescriptor, Config, Database, MigrateError, Result, Row, SourcePool, SqlValue,
    TargetPool,
};

pub const BASE_CONFIG: &str = r#"
source:
  host: mysql.test
  database: shop
  user: etl
  password: secret
target:
  host: pg.test
  database: shop
  user: etl
  password: secret
"#;

/// Build a config with extra `migration:` lines appended.
pub fn config(migration: &str) -> Config {
    let yaml = if migration.is_empty() {
        BASE_CONFIG.to_string()
    } else {
        format!("{}migration:\n{}", BASE_CONFIG, migration)
    };
    Config::from_yaml(&yaml).expect("test config is valid")
}

pub fn col(name: &str, data_type: &str) -> ColumnDescriptor {
    ColumnDescriptor::new(name, data_type)
}

/// `count` rows of `(id, "item-{id}", id % 2)`.
pub fn order_rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            vec![
                SqlValue::I64(i as i64),
                SqlValue::String(format!("item-{}", i)),
                SqlValue::I64((i % 2) as i64),
            ]
        })
        .collect()
}

pub fn order_source_columns() -> Vec<ColumnDescriptor> {
    vec![
        col("id", "int"),
        col("status", "varchar"),
        col("is_paid", "tinyint"),
    ]
}

pub fn order_target_columns() -> Vec<ColumnDescriptor> {
    vec![
        col("id", "integer"),
        col("status", "text"),
        col("is_paid", "boolean"),
    ]
}

struct SourceTable {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
    foreign_keys: i64,
}

/// A MySQL stand-in holding whole tables in memory.
#[derive(Default)]
pub struct FakeSource {
    order: Mutex<Vec<String>>,
    tables: Mutex<HashMap<String, SourceTable>>,
    /// `(table, offset, limit)` of every page read.
    pub reads: Mutex<Vec<(String, u64, u64)>>,
    pub unreachable: bool,
    pub uncountable: Mutex<HashSet<String>>,
    /// Cancel this token once the given number of pages has been read.
    pub cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    /// Panic on the given (1-based) page read.
    pub panic_on_read: Mutex<Option<usize>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        self.order.lock().push(name.to_string());
        self.tables.lock().insert(
            name.to_string(),
            SourceTable {
                columns,
                rows,
                foreign_keys: 0,
            },
        );
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn with_foreign_keys(self, table: &str, count: i64) -> Self {
        if let Some(t) = self.tables.lock().get_mut(table) {
            t.foreign_keys = count;
        }
        self
    }

    pub fn read_offsets(&self, table: &str) -> Vec<u64> {
        self.reads
            .lock()
            .iter()
            .filter(|(t, _, _)| t == table)
            .map(|(_, offset, _)| *offset)
            .collect()
    }
}

#[async_trait]
impl Catalog for FakeSource {
    fn database(&self) -> Database {
        Database::Source
    }

    async fn test_connection(&self) -> Result<()> {
        if self.unreachable {
            return Err(MigrateError::pool("connection refused", "mysql.test:3306"));
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.order.lock().clone())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        if self.uncountable.lock().contains(table) {
            return Err(MigrateError::SchemaExtraction(format!(
                "permission denied for '{}'",
                table
            )));
        }
        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|t| t.rows.len() as i64)
            .unwrap_or(0))
    }

    async fn foreign_key_count(&self, table: &str) -> Result<i64> {
        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|t| t.foreign_keys)
            .unwrap_or(0))
    }

    async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>> {
        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|t| t.rows.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn close(&self) {}
}

#[async_trait]
impl SourcePool for FakeSource {
    async fn read_batch(
        &self,
        table: &str,
        columns: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>> {
        let reads = {
            let mut reads = self.reads.lock();
            reads.push((table.to_string(), offset, limit));
            reads.len()
        };

        if *self.panic_on_read.lock() == Some(reads) {
            panic!("source driver crashed on read {}", reads);
        }
        if let Some((after, token)) = self.cancel_after.lock().as_ref() {
            if reads >= *after {
                token.cancel();
            }
        }

        let tables = self.tables.lock();
        let Some(t) = tables.get(table) else {
            return Err(MigrateError::transfer(table, "no such table"));
        };
        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|c| t.columns.iter().position(|d| &d.name == c))
            .collect();
        Ok(t.rows
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }
}

/// A PostgreSQL stand-in that records writes and trigger changes.
#[derive(Default)]
pub struct FakeTarget {
    order: Mutex<Vec<String>>,
    columns: Mutex<HashMap<String, Vec<ColumnDescriptor>>>,
    /// Rows written per table, with the column list they were written with.
    pub written: Mutex<HashMap<String, Vec<Row>>>,
    pub written_columns: Mutex<HashMap<String, Vec<String>>>,
    pub writes: Mutex<usize>,
    /// 1-based write calls that fail.
    pub failing_writes: Mutex<HashSet<usize>>,
    pub foreign_key_tables: Mutex<Vec<String>>,
    /// Tables whose triggers cannot be disabled.
    pub locked_tables: Mutex<HashSet<String>>,
    /// "disable:<table>", "enable:<table>" and "truncate:<table>" in call order.
    pub calls: Mutex<Vec<String>>,
    pub unreachable: bool,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, columns: Vec<ColumnDescriptor>) -> Self {
        self.order.lock().push(name.to_string());
        self.columns.lock().insert(name.to_string(), columns);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn with_foreign_keys(self, tables: &[&str]) -> Self {
        *self.foreign_key_tables.lock() = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_locked_tables(self, tables: &[&str]) -> Self {
        *self.locked_tables.lock() = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn failing_writes(self, writes: &[usize]) -> Self {
        *self.failing_writes.lock() = writes.iter().copied().collect();
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.written.lock().get(table).cloned().unwrap_or_default()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Catalog for FakeTarget {
    fn database(&self) -> Database {
        Database::Target
    }

    async fn test_connection(&self) -> Result<()> {
        if self.unreachable {
            return Err(MigrateError::pool("connection refused", "pg.test:5432"));
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.order.lock().clone())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        Ok(self.columns.lock().get(table).cloned().unwrap_or_default())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(self.rows(table).len() as i64)
    }

    async fn foreign_key_count(&self, table: &str) -> Result<i64> {
        Ok(self
            .foreign_key_tables
            .lock()
            .iter()
            .filter(|t| *t == table)
            .count() as i64)
    }

    async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>> {
        Ok(self.rows(table).into_iter().take(limit).collect())
    }

    async fn close(&self) {}
}

#[async_trait]
impl TargetPool for FakeTarget {
    async fn write_batch(&self, table: &str, columns: &[String], rows: Vec<Row>) -> Result<u64> {
        let n = {
            let mut writes = self.writes.lock();
            *writes += 1;
            *writes
        };
        if self.failing_writes.lock().contains(&n) {
            return Err(MigrateError::transfer(table, "duplicate key value"));
        }

        let count = rows.len() as u64;
        self.written_columns
            .lock()
            .insert(table.to_string(), columns.to_vec());
        self.written
            .lock()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        Ok(count)
    }

    async fn tables_with_foreign_keys(&self) -> Result<Vec<String>> {
        Ok(self.foreign_key_tables.lock().clone())
    }

    async fn disable_triggers(&self, table: &str) -> Result<()> {
        if self.locked_tables.lock().contains(table) {
            return Err(MigrateError::transfer(table, "must be owner of table"));
        }
        self.calls.lock().push(format!("disable:{}", table));
        Ok(())
    }

    async fn enable_triggers(&self, table: &str) -> Result<()> {
        self.calls.lock().push(format!("enable:{}", table));
        Ok(())
    }

    async fn truncate_table(&self, table: &str) -> Result<()> {
        self.calls.lock().push(format!("truncate:{}", table));
        self.written.lock().remove(table);
        Ok(())
    }
}

/// Shorthand for the trait-object handles the orchestrator takes.
pub fn handles(
    source: FakeSource,
    target: FakeTarget,
) -> (Arc<FakeSource>, Arc<FakeTarget>) {
    (Arc::new(source), Arc::new(target))
}
