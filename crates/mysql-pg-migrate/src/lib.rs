//! # mysql-pg-migrate
//!
//! MySQL to PostgreSQL bulk data migration library.
//!
//! This library moves rows from an existing MySQL schema into an existing
//! PostgreSQL schema with support for:
//!
//! - **Schema reconciliation** across case and naming-convention differences
//! - **Batched transfers** using the PostgreSQL COPY protocol
//! - **Value transformation** for booleans, arrays and numeric strings
//! - **Foreign key suspension** around the load, always restored
//! - **Structured error collection** and progress tracking
//! - **Post-load validation** of counts, columns, samples and relationships
//!
//! ## Example
//!
//! ```rust,no_run
//! use mysql_pg_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config)?;
//!     let result = orchestrator.migrate(CancellationToken::new()).await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constraints;
pub mod core;
pub mod error;
pub mod error_collector;
pub mod orchestrator;
pub mod progress;
pub mod reconcile;
pub mod schema_cache;
pub mod source;
pub mod target;
pub mod transfer;
pub mod transform;
pub mod validate;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use constraints::ConstraintManager;
pub use core::{Catalog, ColumnDescriptor, Database, Row, SqlValue, TableMapping, TableSchema};
pub use error::{MigrateError, Result};
pub use error_collector::{ErrorCategory, ErrorCollector, ErrorExport, MigrationError};
pub use orchestrator::{filter_tables, Analysis, DryRunReport, MigrationResult, Orchestrator};
pub use progress::{MigrationPhase, ProgressEvent, ProgressTracker, TableStatus};
pub use reconcile::{build_column_mapping, resolve_target_table, ColumnMapping};
pub use schema_cache::SchemaCache;
pub use source::{MysqlPool, SourcePool};
pub use target::{PgPool, TargetPool};
pub use transfer::{batch_count, plan_batches, BatchRange, TransferConfig, TransferEngine, TransferStats};
pub use transform::{transform_value, RowTransformer};
pub use validate::{ValidationEngine, ValidationReport};
