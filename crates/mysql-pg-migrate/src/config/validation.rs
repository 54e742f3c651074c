//! Configuration validation.

use std::collections::BTreeSet;

use tracing::warn;

use super::Config;
use crate::error::{MigrateError, Result};

/// Batch sizes above this are accepted but flagged.
const LARGE_BATCH_SIZE: usize = 10_000;

/// Worker counts above this are accepted but flagged.
const HIGH_WORKER_COUNT: usize = 10;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    if config.source.port == 0 {
        return Err(MigrateError::Config(format!(
            "Invalid MySQL port {}",
            config.source.port
        )));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.port == 0 {
        return Err(MigrateError::Config(format!(
            "Invalid PostgreSQL port {}",
            config.target.port
        )));
    }

    let migration = &config.migration;
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be greater than 0".into(),
        ));
    }
    if migration.batch_size > LARGE_BATCH_SIZE {
        warn!(
            "migration.batch_size {} is large and may cause memory issues",
            migration.batch_size
        );
    }
    if migration.max_workers == 0 {
        return Err(MigrateError::Config(
            "migration.max_workers must be greater than 0".into(),
        ));
    }
    if migration.max_workers > HIGH_WORKER_COUNT {
        warn!(
            "migration.max_workers {} may overwhelm database connections",
            migration.max_workers
        );
    }
    if !(0.0..=1.0).contains(&migration.validation_tolerance) {
        return Err(MigrateError::Config(format!(
            "migration.validation_tolerance must be between 0 and 1, got {}",
            migration.validation_tolerance
        )));
    }

    // A table cannot be both included and excluded
    if !migration.include_tables.is_empty() && !migration.exclude_tables.is_empty() {
        let include: BTreeSet<&str> = migration.include_tables.iter().map(String::as_str).collect();
        let overlap: Vec<&str> = migration
            .exclude_tables
            .iter()
            .map(String::as_str)
            .filter(|t| include.contains(t))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !overlap.is_empty() {
            return Err(MigrateError::Config(format!(
                "Tables cannot be both included and excluded: {}",
                overlap.join(", ")
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SourceConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                host: "localhost".to_string(),
                port: 3306,
                database: "source_db".to_string(),
                user: "root".to_string(),
                password: "password".to_string(),
                charset: "utf8mb4".to_string(),
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "target_db".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                ssl_mode: "prefer".to_string(),
                application_name: "mysql-pg-migrate".to_string(),
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("source.host"));
    }

    #[test]
    fn test_missing_target_user() {
        let mut config = valid_config();
        config.target.user = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_zero_workers() {
        let mut config = valid_config();
        config.migration.max_workers = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_large_batch_size_is_only_a_warning() {
        let mut config = valid_config();
        config.migration.batch_size = 50_000;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_port() {
        let mut config = valid_config();
        config.target.port = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("PostgreSQL port"));
    }

    #[test]
    fn test_include_exclude_overlap() {
        let mut config = valid_config();
        config.migration.include_tables = vec!["orders".into(), "users".into()];
        config.migration.exclude_tables = vec!["users".into(), "audit_log".into()];
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("users"));
        assert!(!err.to_string().contains("audit_log"));
    }

    #[test]
    fn test_disjoint_include_exclude() {
        let mut config = valid_config();
        config.migration.include_tables = vec!["orders".into()];
        config.migration.exclude_tables = vec!["audit_log".into()];
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_tolerance_out_of_range() {
        let mut config = valid_config();
        config.migration.validation_tolerance = 1.5;
        assert!(validate(&config).is_err());
    }
}
