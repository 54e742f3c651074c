//! Core types shared by every stage of the migration.
//!
//! - [`schema`]: table and column metadata
//! - [`value`]: extracted cell values
//! - [`identifier`]: identifier validation and quoting for generated SQL
//! - [`traits`]: the [`Catalog`] abstraction both database pools implement

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnDescriptor, Database, TableMapping, TableSchema};
pub use traits::Catalog;
pub use value::{Row, SqlValue};
