//! Post-migration validation.
//!
//! Rebuilds the table mapping with the same discovery, filtering and name
//! resolution the migration used, then compares the two sides in five phases:
//! mappings, record counts, column structure, random samples and foreign keys.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::MigrationConfig;
use crate::core::{ColumnDescriptor, TableMapping, TableSchema};
use crate::error_collector::{ErrorCategory, ErrorCollector};
use crate::orchestrator::filter_tables;
use crate::reconcile::{build_column_mapping, resolve_target_table};
use crate::source::SourcePool;
use crate::target::TargetPool;
use crate::transform::RowTransformer;

/// Pass/fail of each phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseResults {
    pub mappings: bool,
    pub counts: bool,
    pub schema: bool,
    pub samples: bool,
    pub relationships: bool,
}

impl PhaseResults {
    pub fn all_passed(&self) -> bool {
        self.mappings && self.counts && self.schema && self.samples && self.relationships
    }
}

/// Findings for one mapped table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableValidation {
    pub source_table: String,
    pub target_table: String,
    pub source_count: Option<i64>,
    pub target_count: Option<i64>,
    pub count_matches: bool,
    pub schema_matches: bool,
    pub sampled_rows: usize,
    pub array_fallbacks: usize,
    pub issues: Vec<String>,
}

/// Result of a validation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub missing_tables: Vec<String>,
    pub tables: Vec<TableValidation>,
    pub phases: PhaseResults,
}

impl ValidationReport {
    /// Plain-text summary for terminal output.
    pub fn render(&self) -> String {
        let mark = |ok: bool| if ok { "PASS" } else { "FAIL" };
        let mut out = String::new();
        out.push_str("VALIDATION SUMMARY\n");
        out.push_str(&format!("  Table mappings:   {}\n", mark(self.phases.mappings)));
        out.push_str(&format!("  Record counts:    {}\n", mark(self.phases.counts)));
        out.push_str(&format!("  Schema structure: {}\n", mark(self.phases.schema)));
        out.push_str(&format!("  Data samples:     {}\n", mark(self.phases.samples)));
        out.push_str(&format!("  Relationships:    {}\n", mark(self.phases.relationships)));
        for table in self.tables.iter().filter(|t| !t.issues.is_empty()) {
            out.push_str(&format!("  {} -> {}\n", table.source_table, table.target_table));
            for issue in &table.issues {
                out.push_str(&format!("    - {}\n", issue));
            }
        }
        out.push_str(&format!(
            "Result: {}\n",
            if self.passed { "passed" } else { "failed" }
        ));
        out
    }
}

/// Compares source and target after a migration.
pub struct ValidationEngine {
    source: Arc<dyn SourcePool>,
    target: Arc<dyn TargetPool>,
    errors: Arc<ErrorCollector>,
    config: MigrationConfig,
}

impl ValidationEngine {
    pub fn new(
        source: Arc<dyn SourcePool>,
        target: Arc<dyn TargetPool>,
        errors: Arc<ErrorCollector>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            source,
            target,
            errors,
            config,
        }
    }

    pub async fn run(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        info!("Validation phase 1: table mappings");
        let mappings = match self.table_mappings(&mut report).await {
            Some(m) if !m.is_empty() => m,
            _ => {
                warn!("No valid table mappings found");
                return report;
            }
        };
        report.phases.mappings = true;
        report.tables = mappings
            .iter()
            .map(|m| TableValidation {
                source_table: m.source_table.clone(),
                target_table: m.target_table.clone(),
                ..Default::default()
            })
            .collect();

        info!("Validation phase 2: record counts");
        report.phases.counts = true;
        for table in report.tables.iter_mut() {
            report.phases.counts &= self.check_counts(table).await;
        }

        info!("Validation phase 3: schema structures");
        report.phases.schema = true;
        for table in report.tables.iter_mut() {
            report.phases.schema &= self.check_schema(table).await;
        }

        info!("Validation phase 4: data samples");
        report.phases.samples = true;
        for table in report.tables.iter_mut() {
            report.phases.samples &= self.check_samples(table).await;
        }

        info!("Validation phase 5: relationships");
        report.phases.relationships = true;
        for table in report.tables.iter_mut() {
            report.phases.relationships &= self.check_relationships(table).await;
        }

        report.passed = report.phases.all_passed();
        if report.passed {
            info!("All validation phases passed");
        } else {
            warn!("Some validation phases failed");
        }
        report
    }

    async fn table_mappings(&self, report: &mut ValidationReport) -> Option<Vec<TableMapping>> {
        let catalogs = async {
            let source = self.source.list_tables().await?;
            let target = self.target.list_tables().await?;
            crate::Result::Ok((source, target))
        }
        .await;

        let (source_tables, target_tables) = match catalogs {
            Ok(c) => c,
            Err(e) => {
                self.errors.add_error(
                    ErrorCategory::ValidationError,
                    format!("Table mapping validation failed: {}", e),
                    None,
                    true,
                    None,
                );
                return None;
            }
        };

        let filtered = filter_tables(
            &source_tables,
            &self.config.include_tables,
            &self.config.exclude_tables,
        );

        let mut mappings = Vec::new();
        for table in filtered {
            match resolve_target_table(&table, &target_tables) {
                Some(target) => mappings.push(TableMapping {
                    source_table: table.clone(),
                    target_table: target.to_string(),
                    record_count: 0,
                }),
                None => {
                    self.errors.add_missing_table_error(&table, "MySQL", "PostgreSQL");
                    report.missing_tables.push(table);
                }
            }
        }
        Some(mappings)
    }

    fn fail(&self, table: &mut TableValidation, message: String) {
        self.errors.add_table_error(
            &table.source_table,
            ErrorCategory::ValidationError,
            message.clone(),
            true,
        );
        table.issues.push(message);
    }

    fn note(&self, table: &mut TableValidation, message: String) {
        self.errors.add_table_error(
            &table.source_table,
            ErrorCategory::ValidationError,
            message.clone(),
            false,
        );
        table.issues.push(message);
    }

    async fn check_counts(&self, table: &mut TableValidation) -> bool {
        let counts = async {
            let s = self.source.row_count(&table.source_table).await?;
            let t = self.target.row_count(&table.target_table).await?;
            crate::Result::Ok((s, t))
        }
        .await;

        let (s, t) = match counts {
            Ok(c) => c,
            Err(e) => {
                self.fail(table, format!("Failed to validate record count: {}", e));
                return false;
            }
        };
        table.source_count = Some(s);
        table.target_count = Some(t);
        table.count_matches = s == t;
        if s == t {
            return true;
        }

        let difference = (s - t).abs();
        let percentage = count_mismatch_percentage(s, t);
        let message = format!(
            "Record count mismatch: MySQL={}, PostgreSQL={}, diff={} ({:.2}%)",
            s, t, difference, percentage
        );
        if percentage > self.config.validation_tolerance * 100.0 {
            self.fail(table, message);
            false
        } else {
            self.note(table, format!("{} (within tolerance)", message));
            true
        }
    }

    async fn check_schema(&self, table: &mut TableValidation) -> bool {
        let columns = async {
            let s = self.source.describe_table(&table.source_table).await?;
            let t = self.target.describe_table(&table.target_table).await?;
            crate::Result::Ok((s, t))
        }
        .await;

        let (source_cols, target_cols) = match columns {
            Ok(c) => c,
            Err(e) => {
                self.fail(table, format!("Failed to validate schema structure: {}", e));
                return false;
            }
        };

        let diff = compare_columns(&source_cols, &target_cols);
        if diff.is_clean() {
            table.schema_matches = true;
            return true;
        }

        let details = diff.details(source_cols.len(), target_cols.len());
        if source_cols.len() != target_cols.len() {
            self.fail(table, format!("Column count mismatch: {}", details));
            false
        } else {
            self.note(table, format!("Column name differences: {}", details));
            true
        }
    }

    async fn check_samples(&self, table: &mut TableValidation) -> bool {
        let total = match table.source_count {
            Some(n) => n,
            None => match self.source.row_count(&table.source_table).await {
                Ok(n) => n,
                Err(e) => {
                    self.fail(table, format!("Failed to validate data samples: {}", e));
                    return false;
                }
            },
        };
        if total <= 0 {
            info!("{}: no records to sample", table.source_table);
            return true;
        }

        let size = self.config.get_validation_sample_size().min(total as usize);
        let samples = async {
            let s = self.source.sample_rows(&table.source_table, size).await?;
            let t = self.target.sample_rows(&table.target_table, size).await?;
            let s_cols = self.source.describe_table(&table.source_table).await?;
            let t_cols = self.target.describe_table(&table.target_table).await?;
            crate::Result::Ok((s, t, s_cols, t_cols))
        }
        .await;

        let (source_rows, target_rows, source_cols, target_cols) = match samples {
            Ok(s) => s,
            Err(e) => {
                self.fail(table, format!("Failed to validate data samples: {}", e));
                return false;
            }
        };

        table.sampled_rows = source_rows.len();
        if source_rows.len() != target_rows.len() {
            self.fail(
                table,
                format!(
                    "Sample size mismatch: MySQL={}, PostgreSQL={}",
                    source_rows.len(),
                    target_rows.len()
                ),
            );
            return false;
        }

        let source_schema = TableSchema::new(&table.source_table, source_cols);
        let target_schema = TableSchema::new(&table.target_table, target_cols);
        let transformer = RowTransformer::new(
            &source_schema,
            &target_schema,
            &build_column_mapping(&source_schema, &target_schema),
        );
        table.array_fallbacks = source_rows
            .iter()
            .map(|row| transformer.count_array_fallbacks(row))
            .sum();
        if table.array_fallbacks > 0 {
            let message = format!(
                "{} sampled values bound for array columns are not JSON arrays and were copied as text",
                table.array_fallbacks
            );
            self.note(table, message);
        }
        true
    }

    async fn check_relationships(&self, table: &mut TableValidation) -> bool {
        let counts = async {
            let s = self.source.foreign_key_count(&table.source_table).await?;
            let t = self.target.foreign_key_count(&table.target_table).await?;
            crate::Result::Ok((s, t))
        }
        .await;

        match counts {
            Ok((s, t)) if s != t => {
                self.note(
                    table,
                    format!("Foreign key count differs: MySQL={}, PostgreSQL={}", s, t),
                );
            }
            Ok(_) => {}
            Err(e) => {
                self.note(table, format!("Failed to validate relationships: {}", e));
            }
        }
        true
    }
}

/// `|s - t| / max(s, 1)` as a percentage.
pub fn count_mismatch_percentage(source: i64, target: i64) -> f64 {
    (source - target).abs() as f64 / source.max(1) as f64 * 100.0
}

/// Lower-cased column-name comparison of two tables.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ColumnDiff {
    pub missing_in_target: Vec<String>,
    pub extra_in_target: Vec<String>,
    count_differs: bool,
}

impl ColumnDiff {
    pub fn is_clean(&self) -> bool {
        !self.count_differs && self.missing_in_target.is_empty() && self.extra_in_target.is_empty()
    }

    fn details(&self, source_len: usize, target_len: usize) -> String {
        let mut parts = Vec::new();
        if self.count_differs {
            parts.push(format!("MySQL={}, PostgreSQL={}", source_len, target_len));
        }
        if !self.missing_in_target.is_empty() {
            parts.push(format!("Missing in PostgreSQL: {}", self.missing_in_target.join(", ")));
        }
        if !self.extra_in_target.is_empty() {
            parts.push(format!("Extra in PostgreSQL: {}", self.extra_in_target.join(", ")));
        }
        parts.join(" | ")
    }
}

pub fn compare_columns(source: &[ColumnDescriptor], target: &[ColumnDescriptor]) -> ColumnDiff {
    let lower = |cols: &[ColumnDescriptor]| -> BTreeSet<String> {
        cols.iter().map(|c| c.name.to_lowercase()).collect()
    };
    let s = lower(source);
    let t = lower(target);
    ColumnDiff {
        missing_in_target: s.difference(&t).cloned().collect(),
        extra_in_target: t.difference(&s).cloned().collect(),
        count_differs: source.len() != target.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<ColumnDescriptor> {
        names.iter().map(|n| ColumnDescriptor::new(*n, "text")).collect()
    }

    #[test]
    fn test_count_mismatch_percentage() {
        assert_eq!(count_mismatch_percentage(100, 99), 1.0);
        assert_eq!(count_mismatch_percentage(0, 3), 300.0);
        assert_eq!(count_mismatch_percentage(50, 50), 0.0);
    }

    #[test]
    fn test_compare_columns_ignores_case() {
        assert!(compare_columns(&cols(&["id", "Name"]), &cols(&["ID", "name"])).is_clean());
    }

    #[test]
    fn test_compare_columns_reports_differences() {
        let diff = compare_columns(&cols(&["id", "legacy"]), &cols(&["id", "created_at", "x"]));
        assert_eq!(diff.missing_in_target, vec!["legacy"]);
        assert_eq!(diff.extra_in_target, vec!["created_at", "x"]);
        assert_eq!(
            diff.details(2, 3),
            "MySQL=2, PostgreSQL=3 | Missing in PostgreSQL: legacy | Extra in PostgreSQL: created_at, x"
        );
    }
}
