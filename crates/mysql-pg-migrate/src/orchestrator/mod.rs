//! Migration orchestrator - main workflow coordinator.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::constraints::ConstraintManager;
use crate::core::TableMapping;
use crate::error::{MigrateError, Result};
use crate::error_collector::{ErrorCategory, ErrorCollector};
use crate::progress::{MigrationPhase, ProgressEvent, ProgressTracker, TableStatus};
use crate::reconcile::resolve_target_table;
use crate::schema_cache::SchemaCache;
use crate::source::{MysqlPool, SourcePool};
use crate::target::{PgPool, TargetPool};
use crate::transfer::{TransferConfig, TransferEngine};
use crate::validate::{ValidationEngine, ValidationReport};

/// Apply include/exclude filters to a table list.
///
/// A non-empty `include` keeps only the listed names, then `exclude` removes
/// names. Comparison is exact and the input order is preserved.
pub fn filter_tables<S: AsRef<str>>(
    tables: &[S],
    include: &[String],
    exclude: &[String],
) -> Vec<String> {
    tables
        .iter()
        .map(|t| t.as_ref())
        .filter(|t| include.is_empty() || include.iter().any(|i| i == t))
        .filter(|t| !exclude.iter().any(|e| e == t))
        .map(str::to_string)
        .collect()
}

/// Outcome of table discovery and reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    /// Mapped tables with their source row counts, in source order.
    pub mappings: Vec<TableMapping>,

    /// Source tables with no usable target counterpart.
    pub missing_tables: Vec<String>,
}

impl Analysis {
    pub fn total_records(&self) -> i64 {
        self.mappings.iter().map(|m| m.record_count).sum()
    }
}

/// Report produced by [`Orchestrator::dry_run`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DryRunReport {
    pub success: bool,
    pub total_records: i64,
    pub mappings: Vec<TableMapping>,
    pub missing_tables: Vec<String>,
}

impl DryRunReport {
    /// Plain-text mapping report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("DRY RUN\n");
        out.push_str(&format!(
            "Tables to migrate: {} ({} records)\n",
            self.mappings.len(),
            self.total_records
        ));
        let width = self
            .mappings
            .iter()
            .map(|m| m.source_table.len())
            .max()
            .unwrap_or(0);
        for m in &self.mappings {
            out.push_str(&format!(
                "  {:<width$} -> {} ({} records)\n",
                m.source_table,
                m.target_table,
                m.record_count,
                width = width
            ));
        }
        if !self.missing_tables.is_empty() {
            out.push_str(&format!(
                "Missing in target: {}\n",
                self.missing_tables.join(", ")
            ));
        }
        out.push_str(&format!(
            "Result: {}\n",
            if self.success { "ready" } else { "not ready" }
        ));
        out
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: "completed", "failed" or "cancelled".
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Tables registered for the run, skipped ones included.
    pub tables_total: usize,

    /// Tables successfully migrated.
    pub tables_success: usize,

    /// Tables that failed.
    pub tables_failed: usize,

    /// Tables skipped because they have no target counterpart.
    pub tables_skipped: usize,

    /// Total rows transferred.
    pub rows_transferred: i64,

    /// Average throughput (rows/second).
    pub rows_per_second: i64,

    /// List of failed table names.
    pub failed_tables: Vec<String>,

    /// Post-load validation, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
}

impl MigrationResult {
    pub fn succeeded(&self) -> bool {
        self.status == "completed"
    }

    /// Serialize the result as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Default)]
struct LoadOutcome {
    rows: u64,
    stopped: bool,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourcePool>,
    target: Arc<dyn TargetPool>,
    errors: Arc<ErrorCollector>,
    progress: Arc<ProgressTracker>,
    schemas: Arc<SchemaCache>,
    validate_after: bool,
}

impl Orchestrator {
    /// Create an orchestrator with MySQL and PostgreSQL pools.
    ///
    /// Pools connect lazily; [`test_connections`](Self::test_connections)
    /// is the first point where an unreachable server is reported.
    pub fn new(config: Config) -> Result<Self> {
        let max_conns = config.migration.max_workers.max(1);
        let timeout = config.migration.get_connection_timeout();
        let query_timeout = config.migration.get_query_timeout();

        let source = MysqlPool::new(&config.source, max_conns as u32, timeout, query_timeout)?;
        let target = PgPool::new(&config.target, max_conns, timeout, query_timeout)?;

        Ok(Self::from_parts(config, Arc::new(source), Arc::new(target)))
    }

    /// Create an orchestrator over existing database handles.
    pub fn from_parts(
        config: Config,
        source: Arc<dyn SourcePool>,
        target: Arc<dyn TargetPool>,
    ) -> Self {
        let errors = Arc::new(ErrorCollector::new());
        let schemas = Arc::new(SchemaCache::new(
            config.migration.ignore_generated_columns,
            Arc::clone(&errors),
        ));
        Self {
            config,
            source,
            target,
            errors,
            progress: Arc::new(ProgressTracker::new()),
            schemas,
            validate_after: false,
        }
    }

    /// Forward progress events to `tx`.
    pub fn with_progress_events(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Arc::new(ProgressTracker::new().with_events(tx));
        self
    }

    /// Run validation after a successful load.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_after = enabled;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn errors(&self) -> Arc<ErrorCollector> {
        Arc::clone(&self.errors)
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Check both databases, recording a critical CONNECTION error per failure.
    pub async fn test_connections(&self) -> bool {
        let mut ok = true;

        match self.source.test_connection().await {
            Ok(()) => info!("Connected to source ({})", self.source.database()),
            Err(e) => {
                self.errors
                    .add_connection_error(&self.source.database().to_string(), e, true);
                ok = false;
            }
        }

        match self.target.test_connection().await {
            Ok(()) => info!("Connected to target ({})", self.target.database()),
            Err(e) => {
                self.errors
                    .add_connection_error(&self.target.database().to_string(), e, true);
                ok = false;
            }
        }

        ok
    }

    /// Discover, filter and reconcile tables and count source rows.
    ///
    /// Never touches target data. A source table whose row count cannot be
    /// read is recorded and treated as missing.
    pub async fn analyze(&self) -> Result<Analysis> {
        let source_tables = self.source.list_tables().await?;
        if source_tables.is_empty() {
            return Err(MigrateError::SchemaExtraction(
                "No tables found in source database".into(),
            ));
        }

        let tables = filter_tables(
            &source_tables,
            &self.config.migration.include_tables,
            &self.config.migration.exclude_tables,
        );
        if tables.is_empty() {
            return Err(MigrateError::SchemaExtraction(
                "No tables left to migrate after applying include/exclude filters".into(),
            ));
        }
        info!(
            "Found {} source tables, {} selected",
            source_tables.len(),
            tables.len()
        );

        let target_tables = self.target.list_tables().await?;
        let mut analysis = Analysis::default();

        for table in tables {
            let record_count = match self.source.row_count(&table).await {
                Ok(n) => n,
                Err(e) => {
                    self.errors.add_schema_error(
                        &table,
                        format!("Failed to count rows in '{}': {}", table, e),
                        false,
                    );
                    analysis.missing_tables.push(table);
                    continue;
                }
            };

            match resolve_target_table(&table, &target_tables) {
                Some(target) => {
                    info!("{} -> {} ({} records)", table, target, record_count);
                    analysis.mappings.push(TableMapping {
                        source_table: table.clone(),
                        target_table: target.to_string(),
                        record_count,
                    });
                }
                None => {
                    self.errors.add_missing_table_error(
                        &table,
                        &self.source.database().to_string(),
                        &self.target.database().to_string(),
                    );
                    analysis.missing_tables.push(table);
                }
            }
        }

        Ok(analysis)
    }

    /// Connect and analyze without loading anything.
    pub async fn dry_run(&self) -> DryRunReport {
        self.progress.set_phase(MigrationPhase::Connecting);
        if !self.test_connections().await {
            self.progress.set_phase(MigrationPhase::Failed);
            return DryRunReport::default();
        }

        self.progress.set_phase(MigrationPhase::Analyzing);
        let analysis = match self.analyze().await {
            Ok(a) => a,
            Err(e) => {
                self.record_analysis_failure(&e);
                self.progress.set_phase(MigrationPhase::Failed);
                return DryRunReport::default();
            }
        };

        let success = !analysis.mappings.is_empty()
            && (analysis.missing_tables.is_empty() || !self.config.migration.fail_on_missing_tables);
        self.progress.set_phase(if success {
            MigrationPhase::Completed
        } else {
            MigrationPhase::Failed
        });

        DryRunReport {
            success,
            total_records: analysis.total_records(),
            mappings: analysis.mappings,
            missing_tables: analysis.missing_tables,
        }
    }

    /// Run the full migration.
    ///
    /// Table-level failures end up in the returned result and the error
    /// collector. Errors are returned for runs that cannot start (connection,
    /// analysis, missing tables) and for cancellation.
    pub async fn migrate(&self, cancel: CancellationToken) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        self.progress.set_phase(MigrationPhase::Connecting);
        if !self.test_connections().await {
            self.progress.set_phase(MigrationPhase::Failed);
            return Err(MigrateError::pool(
                "could not connect to source and target databases",
                "testing connections",
            ));
        }

        self.progress.set_phase(MigrationPhase::Analyzing);
        let analysis = match self.analyze().await {
            Ok(a) => a,
            Err(e) => {
                self.record_analysis_failure(&e);
                self.progress.set_phase(MigrationPhase::Failed);
                return Err(e);
            }
        };

        if !analysis.missing_tables.is_empty() && self.config.migration.fail_on_missing_tables {
            self.progress.set_phase(MigrationPhase::Failed);
            return Err(MigrateError::SchemaExtraction(format!(
                "Tables missing in target: {}",
                analysis.missing_tables.join(", ")
            )));
        }

        let mut registered: Vec<(&str, u64)> = analysis
            .mappings
            .iter()
            .map(|m| (m.source_table.as_str(), m.record_count.max(0) as u64))
            .collect();
        registered.extend(analysis.missing_tables.iter().map(|t| (t.as_str(), 0)));
        self.progress.register_tables(&registered);
        for table in &analysis.missing_tables {
            self.progress.skip_table(table, "No matching target table");
        }

        if cancel.is_cancelled() {
            self.progress.set_phase(MigrationPhase::Failed);
            return Err(MigrateError::Cancelled);
        }

        self.progress.set_phase(MigrationPhase::Migrating);
        let load = self.load_bracketed(&analysis.mappings, &cancel).await;
        let outcome = match load {
            Ok(outcome) => outcome,
            Err(e) => {
                self.progress.set_phase(MigrationPhase::Failed);
                return Err(e);
            }
        };

        let mut result = self.build_result(run_id, started_at, &outcome);

        if self.validate_after && result.succeeded() {
            let report = self.validate().await;
            if !report.passed {
                result.status = "failed".to_string();
            }
            result.validation = Some(report);
        }

        self.progress.set_phase(if result.succeeded() {
            MigrationPhase::Completed
        } else {
            MigrationPhase::Failed
        });

        info!(
            "Migration {}: {} tables, {} rows in {:.1}s ({} rows/s)",
            result.status,
            result.tables_total,
            result.rows_transferred,
            result.duration_seconds,
            result.rows_per_second
        );

        Ok(result)
    }

    /// Compare source and target after a load.
    pub async fn validate(&self) -> ValidationReport {
        self.progress.set_phase(MigrationPhase::Validating);
        ValidationEngine::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            Arc::clone(&self.errors),
            self.config.migration.clone(),
        )
        .run()
        .await
    }

    /// Close both pools.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }

    /// Suspend integrity, load, and restore integrity on every exit path.
    async fn load_bracketed(
        &self,
        mappings: &[TableMapping],
        cancel: &CancellationToken,
    ) -> Result<LoadOutcome> {
        let constraints = ConstraintManager::new(
            Arc::clone(&self.target),
            Arc::clone(&self.errors),
            self.config.migration.disable_foreign_keys,
        );

        if !constraints.suspend_integrity().await {
            warn!("Some foreign key constraints could not be suspended");
        }

        let load = AssertUnwindSafe(async {
            if self.config.migration.truncate_target_tables {
                let truncated = constraints.truncate_targets(mappings).await;
                info!("Truncated {} of {} target tables", truncated, mappings.len());
            }
            self.load_tables(mappings, cancel).await
        })
        .catch_unwind()
        .await;

        if !constraints.restore_integrity().await {
            error!(
                "Foreign key enforcement still disabled on: {}",
                constraints.suspended_tables().join(", ")
            );
        }

        match load {
            Ok(result) => result,
            Err(panic) => {
                self.progress.set_phase(MigrationPhase::Failed);
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn load_tables(
        &self,
        mappings: &[TableMapping],
        cancel: &CancellationToken,
    ) -> Result<LoadOutcome> {
        let engine = TransferEngine::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            Arc::clone(&self.schemas),
            Arc::clone(&self.progress),
            Arc::clone(&self.errors),
            TransferConfig {
                batch_size: self.config.migration.batch_size,
                continue_on_error: self.config.migration.continue_on_error,
            },
        );

        let mut outcome = LoadOutcome::default();
        for (i, mapping) in mappings.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("Migration cancelled before table '{}'", mapping.source_table);
                return Err(MigrateError::Cancelled);
            }
            if self.errors.should_stop_migration(self.config.migration.fail_fast) {
                warn!(
                    "Stopping after {} critical errors; {} tables not started",
                    self.errors.critical_error_count(),
                    mappings.len() - i
                );
                outcome.stopped = true;
                break;
            }

            let stats = engine.execute(mapping, cancel).await?;
            outcome.rows += stats.rows;

            if stats.completed {
                info!(
                    "Migrated {} -> {}: {} rows in {:.1}s",
                    mapping.source_table,
                    mapping.target_table,
                    stats.rows,
                    stats.duration.as_secs_f64()
                );
            } else if !self.config.migration.continue_on_error {
                error!(
                    "Table '{}' failed; stopping because continue_on_error is disabled",
                    mapping.source_table
                );
                outcome.stopped = true;
                break;
            } else {
                warn!("Table '{}' failed; continuing", mapping.source_table);
            }
        }

        Ok(outcome)
    }

    fn build_result(
        &self,
        run_id: String,
        started_at: DateTime<Utc>,
        outcome: &LoadOutcome,
    ) -> MigrationResult {
        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let tables = self.progress.tables();
        let mut tables_success = 0;
        let mut tables_skipped = 0;
        let mut failed_tables = Vec::new();
        for table in &tables {
            match table.status {
                TableStatus::Completed => tables_success += 1,
                TableStatus::Failed => failed_tables.push(table.name.clone()),
                TableStatus::Skipped => tables_skipped += 1,
                _ => {}
            }
        }

        let rows_transferred = outcome.rows as i64;
        let rows_per_second = if duration > 0.0 {
            (rows_transferred as f64 / duration) as i64
        } else {
            0
        };

        let status = if outcome.stopped || !failed_tables.is_empty() {
            "failed"
        } else {
            "completed"
        };

        MigrationResult {
            run_id,
            status: status.to_string(),
            duration_seconds: duration,
            started_at,
            completed_at,
            tables_total: tables.len(),
            tables_success,
            tables_failed: failed_tables.len(),
            tables_skipped,
            rows_transferred,
            rows_per_second,
            failed_tables,
            validation: None,
        }
    }

    fn record_analysis_failure(&self, e: &MigrateError) {
        let category = if e.is_connection() {
            ErrorCategory::Connection
        } else {
            ErrorCategory::SchemaAnalysis
        };
        self.errors
            .add_error(category, format!("Analysis failed: {}", e), None, true, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_tables_include_then_exclude() {
        let tables = ["users", "orders", "audit_log", "sessions"];
        assert_eq!(filter_tables(&tables, &[], &[]), names(&tables));
        assert_eq!(
            filter_tables(&tables, &names(&["sessions", "users"]), &[]),
            names(&["users", "sessions"])
        );
        assert_eq!(
            filter_tables(&tables, &[], &names(&["audit_log"])),
            names(&["users", "orders", "sessions"])
        );
        assert_eq!(
            filter_tables(&tables, &names(&["users", "orders"]), &names(&["orders"])),
            names(&["users"])
        );
    }

    #[test]
    fn test_filter_tables_is_exact() {
        let tables = ["Users", "users"];
        assert_eq!(filter_tables(&tables, &names(&["users"]), &[]), names(&["users"]));
    }

    #[test]
    fn test_dry_run_render() {
        let report = DryRunReport {
            success: false,
            total_records: 12,
            mappings: vec![TableMapping {
                source_table: "orders".into(),
                target_table: "Orders".into(),
                record_count: 12,
            }],
            missing_tables: names(&["legacy"]),
        };
        let text = report.render();
        assert!(text.contains("orders -> Orders (12 records)"));
        assert!(text.contains("Missing in target: legacy"));
        assert!(text.contains("not ready"));
    }
}
