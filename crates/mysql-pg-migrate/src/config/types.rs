//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MySQL).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Connection character set (default: "utf8mb4").
    #[serde(default = "default_charset")]
    pub charset: String,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,

    /// Application name reported to the server.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows extracted and inserted per batch (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Connection pool capacity hint (default: 2).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Only migrate these tables (exact names). Empty means all tables.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Never migrate these tables (exact names).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Abort before loading when a source table has no target counterpart (default: true).
    #[serde(default = "default_true")]
    pub fail_on_missing_tables: bool,

    /// Skip failing batches and tables instead of aborting (default: false).
    #[serde(default)]
    pub continue_on_error: bool,

    /// Leave generated target columns out of inserts (default: true).
    #[serde(default = "default_true")]
    pub ignore_generated_columns: bool,

    /// Disable triggers on tables with foreign keys during the load (default: true).
    #[serde(default = "default_true")]
    pub disable_foreign_keys: bool,

    /// Truncate mapped target tables before loading (default: false).
    #[serde(default)]
    pub truncate_target_tables: bool,

    /// Connection timeout in seconds (default: 30).
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Per-statement timeout in seconds (default: 300).
    #[serde(default = "default_query_timeout")]
    pub query_timeout: u64,

    /// Rows sampled per table during validation (default: 100, capped at 1000).
    #[serde(default = "default_validation_sample_size")]
    pub validation_sample_size: usize,

    /// Allowed row count drift as a fraction (default: 0.01).
    #[serde(default = "default_validation_tolerance")]
    pub validation_tolerance: f64,

    /// Stop between tables on the first critical error (default: false).
    #[serde(default)]
    pub fail_fast: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            fail_on_missing_tables: true,
            continue_on_error: false,
            ignore_generated_columns: true,
            disable_foreign_keys: true,
            truncate_target_tables: false,
            connection_timeout: default_connection_timeout(),
            query_timeout: default_query_timeout(),
            validation_sample_size: default_validation_sample_size(),
            validation_tolerance: default_validation_tolerance(),
            fail_fast: false,
        }
    }
}

impl MigrationConfig {
    /// Validation sample size with the hard cap applied.
    pub fn get_validation_sample_size(&self) -> usize {
        self.validation_sample_size.min(MAX_VALIDATION_SAMPLE_SIZE)
    }
}

/// Upper bound on rows sampled per table during validation.
pub const MAX_VALIDATION_SAMPLE_SIZE: usize = 1000;

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("charset", &self.charset)
            .finish()
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("application_name", &self.application_name)
            .finish()
    }
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_pg_port() -> u16 {
    5432
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_application_name() -> String {
    "mysql-pg-migrate".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_max_workers() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_query_timeout() -> u64 {
    300
}

fn default_validation_sample_size() -> usize {
    100
}

fn default_validation_tolerance() -> f64 {
    0.01
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_defaults() {
        let m = MigrationConfig::default();
        assert_eq!(m.batch_size, 100);
        assert_eq!(m.max_workers, 2);
        assert!(m.fail_on_missing_tables);
        assert!(!m.continue_on_error);
        assert!(m.ignore_generated_columns);
        assert!(m.disable_foreign_keys);
        assert!(!m.truncate_target_tables);
        assert_eq!(m.connection_timeout, 30);
        assert_eq!(m.query_timeout, 300);
    }

    #[test]
    fn test_sample_size_is_capped() {
        let m = MigrationConfig {
            validation_sample_size: 50_000,
            ..Default::default()
        };
        assert_eq!(m.get_validation_sample_size(), MAX_VALIDATION_SAMPLE_SIZE);
    }

    #[test]
    fn test_source_debug_redacts_password() {
        let source = SourceConfig {
            host: "mysql.internal".to_string(),
            port: 3306,
            database: "shop".to_string(),
            user: "etl".to_string(),
            password: "hunter2".to_string(),
            charset: default_charset(),
        };
        let debug = format!("{:?}", source);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_target_debug_redacts_password() {
        let target = TargetConfig {
            host: "pg.internal".to_string(),
            port: 5432,
            database: "shop".to_string(),
            user: "etl".to_string(),
            password: "s3cret".to_string(),
            schema: default_public_schema(),
            ssl_mode: default_prefer(),
            application_name: default_application_name(),
        };
        let debug = format!("{:?}", target);
        assert!(!debug.contains("s3cret"));
    }
}
