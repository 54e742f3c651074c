//! Categorized collection of migration failures.
//!
//! [`MigrateError`](crate::MigrateError) is what functions propagate; a
//! [`MigrationError`] is what the run *reports*. Every failure the engine
//! recovers from is recorded here before it is swallowed, and the collected
//! records drive the stop/continue advice and the end-of-run summary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};

/// More critical errors than this always recommend stopping.
pub const CRITICAL_ERROR_THRESHOLD: usize = 5;

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Configuration,
    Connection,
    SchemaAnalysis,
    MissingTables,
    DataTypeMapping,
    MigrationError,
    ValidationError,
    PermissionError,
    TimeoutError,
    ResourceError,
    UnknownError,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 11] = [
        ErrorCategory::Configuration,
        ErrorCategory::Connection,
        ErrorCategory::SchemaAnalysis,
        ErrorCategory::MissingTables,
        ErrorCategory::DataTypeMapping,
        ErrorCategory::MigrationError,
        ErrorCategory::ValidationError,
        ErrorCategory::PermissionError,
        ErrorCategory::TimeoutError,
        ErrorCategory::ResourceError,
        ErrorCategory::UnknownError,
    ];

    /// Wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "CONFIGURATION",
            ErrorCategory::Connection => "CONNECTION",
            ErrorCategory::SchemaAnalysis => "SCHEMA_ANALYSIS",
            ErrorCategory::MissingTables => "MISSING_TABLES",
            ErrorCategory::DataTypeMapping => "DATA_TYPE_MAPPING",
            ErrorCategory::MigrationError => "MIGRATION_ERROR",
            ErrorCategory::ValidationError => "VALIDATION_ERROR",
            ErrorCategory::PermissionError => "PERMISSION_ERROR",
            ErrorCategory::TimeoutError => "TIMEOUT_ERROR",
            ErrorCategory::ResourceError => "RESOURCE_ERROR",
            ErrorCategory::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Parse a category tag received from outside the engine.
    ///
    /// Unrecognized tags become [`ErrorCategory::UnknownError`].
    pub fn from_tag(tag: &str) -> Self {
        match Self::ALL.iter().find(|c| c.as_str() == tag) {
            Some(category) => *category,
            None => {
                warn!("Unknown error category: {}", tag);
                ErrorCategory::UnknownError
            }
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded failure. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationError {
    pub category: ErrorCategory,
    pub message: String,
    pub table_name: Option<String>,
    pub critical: bool,
    pub timestamp: DateTime<Utc>,
    pub context: Option<Value>,
}

/// Serialized form of a critical error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedError {
    pub category: String,
    pub message: String,
    pub table_name: Option<String>,
    pub critical: bool,
    pub timestamp: String,
    pub context: Option<Value>,
}

/// Serialized form of a warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedWarning {
    pub category: String,
    pub message: String,
    pub table_name: Option<String>,
    pub timestamp: String,
    pub context: Option<Value>,
}

/// Aggregate figures of an export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSummary {
    pub total_issues: usize,
    pub critical_errors: usize,
    pub warnings: usize,
    pub error_counts: BTreeMap<String, usize>,
}

/// Structured summary consumed by reporting and serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorExport {
    pub summary: ExportSummary,
    pub errors: Vec<ExportedError>,
    pub warnings: Vec<ExportedWarning>,
}

#[derive(Default)]
struct Inner {
    errors: Vec<MigrationError>,
    warnings: Vec<MigrationError>,
    counts: BTreeMap<ErrorCategory, usize>,
    critical_count: usize,
}

/// Thread-safe collector of critical errors and warnings.
#[derive(Default)]
pub struct ErrorCollector {
    inner: Mutex<Inner>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error. `critical` selects the error or the warning sequence.
    pub fn add_error(
        &self,
        category: ErrorCategory,
        message: impl Into<String>,
        table_name: Option<&str>,
        critical: bool,
        context: Option<Value>,
    ) {
        let record = MigrationError {
            category,
            message: message.into(),
            table_name: table_name.map(str::to_string),
            critical,
            timestamp: Utc::now(),
            context,
        };

        let scope = record.table_name.as_deref().unwrap_or("unknown");
        if critical {
            error!("Critical error in {}: {}", scope, record.message);
        } else {
            warn!("Warning in {}: {}", scope, record.message);
        }

        let mut inner = self.inner.lock();
        *inner.counts.entry(category).or_insert(0) += 1;
        if critical {
            inner.critical_count += 1;
            inner.errors.push(record);
        } else {
            inner.warnings.push(record);
        }
    }

    /// Record an error whose category arrives as a free-form tag.
    pub fn add_tagged(
        &self,
        tag: &str,
        message: impl Into<String>,
        table_name: Option<&str>,
        critical: bool,
        context: Option<Value>,
    ) {
        self.add_error(
            ErrorCategory::from_tag(tag),
            message,
            table_name,
            critical,
            context,
        );
    }

    /// Record a table-scoped error.
    pub fn add_table_error(
        &self,
        table_name: &str,
        category: ErrorCategory,
        message: impl Into<String>,
        critical: bool,
    ) {
        self.add_error(
            category,
            message,
            Some(table_name),
            critical,
            Some(json!({ "table": table_name })),
        );
    }

    /// Record a connection failure. Connection errors are critical unless stated otherwise.
    pub fn add_connection_error(&self, database: &str, message: impl fmt::Display, critical: bool) {
        self.add_error(
            ErrorCategory::Connection,
            format!("{} connection error: {}", database, message),
            None,
            critical,
            Some(json!({ "database": database })),
        );
    }

    /// Record a schema analysis failure.
    pub fn add_schema_error(&self, table_name: &str, message: impl Into<String>, critical: bool) {
        self.add_table_error(table_name, ErrorCategory::SchemaAnalysis, message, critical);
    }

    /// Record a source table without a target counterpart.
    pub fn add_missing_table_error(&self, table_name: &str, source_db: &str, target_db: &str) {
        self.add_table_error(
            table_name,
            ErrorCategory::MissingTables,
            format!(
                "Table '{}' exists in {} but not in {}",
                table_name, source_db, target_db
            ),
            false,
        );
    }

    pub fn has_errors(&self) -> bool {
        !self.inner.lock().errors.is_empty()
    }

    pub fn has_critical_errors(&self) -> bool {
        self.inner.lock().critical_count > 0
    }

    pub fn has_warnings(&self) -> bool {
        !self.inner.lock().warnings.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.inner.lock().errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.inner.lock().warnings.len()
    }

    pub fn critical_error_count(&self) -> usize {
        self.inner.lock().critical_count
    }

    /// Count of records (errors and warnings) in a category.
    pub fn category_count(&self, category: ErrorCategory) -> usize {
        self.inner.lock().counts.get(&category).copied().unwrap_or(0)
    }

    /// Every record in a category, errors first.
    pub fn errors_by_category(&self, category: ErrorCategory) -> Vec<MigrationError> {
        let inner = self.inner.lock();
        inner
            .errors
            .iter()
            .chain(inner.warnings.iter())
            .filter(|e| e.category == category)
            .cloned()
            .collect()
    }

    /// Every record scoped to a table, errors first.
    pub fn errors_by_table(&self, table_name: &str) -> Vec<MigrationError> {
        let inner = self.inner.lock();
        inner
            .errors
            .iter()
            .chain(inner.warnings.iter())
            .filter(|e| e.table_name.as_deref() == Some(table_name))
            .cloned()
            .collect()
    }

    /// Sorted, de-duplicated names of tables that have any record.
    pub fn tables_with_errors(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .errors
            .iter()
            .chain(inner.warnings.iter())
            .filter_map(|e| e.table_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Snapshot of the critical errors.
    pub fn errors(&self) -> Vec<MigrationError> {
        self.inner.lock().errors.clone()
    }

    /// Snapshot of the warnings.
    pub fn warnings(&self) -> Vec<MigrationError> {
        self.inner.lock().warnings.clone()
    }

    pub fn clear(&self) {
        *self.inner.lock() = Inner::default();
    }

    /// Advise whether the run should stop.
    ///
    /// True when `fail_fast` is set and any critical error exists, when more
    /// than [`CRITICAL_ERROR_THRESHOLD`] critical errors exist, or when any
    /// critical error is a connection error.
    pub fn should_stop_migration(&self, fail_fast: bool) -> bool {
        let inner = self.inner.lock();
        if fail_fast && inner.critical_count > 0 {
            return true;
        }
        if inner.critical_count > CRITICAL_ERROR_THRESHOLD {
            return true;
        }
        inner
            .errors
            .iter()
            .any(|e| e.critical && e.category == ErrorCategory::Connection)
    }

    /// Structured summary with stable field names.
    pub fn export(&self) -> ErrorExport {
        let inner = self.inner.lock();
        ErrorExport {
            summary: ExportSummary {
                total_issues: inner.errors.len() + inner.warnings.len(),
                critical_errors: inner.critical_count,
                warnings: inner.warnings.len(),
                error_counts: inner
                    .counts
                    .iter()
                    .map(|(c, n)| (c.as_str().to_string(), *n))
                    .collect(),
            },
            errors: inner
                .errors
                .iter()
                .map(|e| ExportedError {
                    category: e.category.as_str().to_string(),
                    message: e.message.clone(),
                    table_name: e.table_name.clone(),
                    critical: e.critical,
                    timestamp: e.timestamp.to_rfc3339(),
                    context: e.context.clone(),
                })
                .collect(),
            warnings: inner
                .warnings
                .iter()
                .map(|w| ExportedWarning {
                    category: w.category.as_str().to_string(),
                    message: w.message.clone(),
                    table_name: w.table_name.clone(),
                    timestamp: w.timestamp.to_rfc3339(),
                    context: w.context.clone(),
                })
                .collect(),
        }
    }

    /// Human-readable summary block.
    pub fn render_summary(&self) -> String {
        let inner = self.inner.lock();
        let rule = "=".repeat(60);
        let mut out = String::new();
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "ERROR SUMMARY");
        let _ = writeln!(out, "{}", rule);

        if inner.errors.is_empty() && inner.warnings.is_empty() {
            let _ = writeln!(out, "No errors or warnings to report.");
            return out;
        }

        let _ = writeln!(
            out,
            "Total Issues: {}",
            inner.errors.len() + inner.warnings.len()
        );
        let _ = writeln!(out, "Critical Errors: {}", inner.critical_count);
        let _ = writeln!(out, "Warnings: {}", inner.warnings.len());

        if !inner.counts.is_empty() {
            let _ = writeln!(out, "\nErrors by Category:");
            for (category, count) in &inner.counts {
                let _ = writeln!(out, "  {}: {}", category, count);
            }
        }

        for (title, records) in [("CRITICAL ERRORS", &inner.errors), ("WARNINGS", &inner.warnings)] {
            if records.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{}:", title);
            for (i, record) in records.iter().enumerate() {
                let _ = writeln!(out, "  {}. [{}] {}", i + 1, record.category, record.message);
                if let Some(table) = &record.table_name {
                    let _ = writeln!(out, "     Table: {}", table);
                }
            }
        }

        let _ = writeln!(out, "{}", rule);
        out
    }
}
