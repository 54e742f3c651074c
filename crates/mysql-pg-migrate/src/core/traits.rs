//! Catalog access shared by both sides of the migration.
//!
//! The engine talks to the databases only through [`Catalog`] and its two
//! extensions, [`SourcePool`](crate::source::SourcePool) and
//! [`TargetPool`](crate::target::TargetPool), so every component above the
//! drivers can be exercised against in-memory implementations.

use async_trait::async_trait;

use crate::error::Result;

use super::schema::{ColumnDescriptor, Database};
use super::value::Row;

/// Read-only metadata and sampling operations available on either database.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Which side of the migration this catalog serves.
    fn database(&self) -> Database;

    /// Check that a connection can be obtained and used.
    async fn test_connection(&self) -> Result<()>;

    /// Base table names in catalog order.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns of a table in ordinal order. Empty when the table does not exist.
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Exact row count (`SELECT COUNT(*)`).
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Number of foreign key constraints declared on a table.
    async fn foreign_key_count(&self, table: &str) -> Result<i64>;

    /// Up to `limit` randomly chosen rows, all columns in ordinal order.
    async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>>;

    /// Close all connections.
    async fn close(&self);
}
