//! Phase, per-table and aggregate progress tracking.
//!
//! One [`ProgressTracker`] exists per run and is shared by reference between
//! the orchestrator, the transfer engine and any observer. Writers take the
//! exclusive side of an `RwLock`, readers the shared side. Observers that want
//! push notifications attach an unbounded channel with
//! [`ProgressTracker::with_events`]; events are sent after the lock is dropped.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Coarse stage of the run. Declaration order is the allowed transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationPhase {
    Initializing,
    Connecting,
    Analyzing,
    Migrating,
    Validating,
    Completed,
    Failed,
}

impl MigrationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationPhase::Completed | MigrationPhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPhase::Initializing => "INITIALIZING",
            MigrationPhase::Connecting => "CONNECTING",
            MigrationPhase::Analyzing => "ANALYZING",
            MigrationPhase::Migrating => "MIGRATING",
            MigrationPhase::Validating => "VALIDATING",
            MigrationPhase::Completed => "COMPLETED",
            MigrationPhase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl TableStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TableStatus::Completed | TableStatus::Failed | TableStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Pending => "PENDING",
            TableStatus::InProgress => "IN_PROGRESS",
            TableStatus::Completed => "COMPLETED",
            TableStatus::Failed => "FAILED",
            TableStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn elapsed_seconds(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<f64> {
    let start = start?;
    let end = end.unwrap_or_else(Utc::now);
    Some((end - start).num_milliseconds().max(0) as f64 / 1000.0)
}

fn percentage(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64 * 100.0).min(100.0)
}

fn rate(count: u64, seconds: Option<f64>) -> f64 {
    match seconds {
        Some(s) if s > 0.0 => count as f64 / s,
        _ => 0.0,
    }
}

/// Progress of a single table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableProgress {
    pub name: String,
    pub status: TableStatus,
    pub total_records: u64,
    pub processed_records: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub batch_count: u64,
    pub current_batch: u64,
}

impl TableProgress {
    fn new(name: &str, total_records: u64) -> Self {
        Self {
            name: name.to_string(),
            status: TableStatus::Pending,
            total_records,
            processed_records: 0,
            start_time: None,
            end_time: None,
            error_message: None,
            batch_count: 0,
            current_batch: 0,
        }
    }

    /// Percentage done, capped at 100. Zero when the table has no rows.
    pub fn progress_percentage(&self) -> f64 {
        percentage(self.processed_records, self.total_records)
    }

    /// Seconds since the table started, or its total runtime once finished.
    pub fn duration(&self) -> Option<f64> {
        elapsed_seconds(self.start_time, self.end_time)
    }

    pub fn records_per_second(&self) -> f64 {
        rate(self.processed_records, self.duration())
    }
}

/// Aggregate figures for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStats {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub phase: MigrationPhase,
    pub total_tables: usize,
    pub completed_tables: usize,
    pub failed_tables: usize,
    pub skipped_tables: usize,
    pub total_records: u64,
    pub processed_records: u64,
    pub errors_count: usize,
    pub warnings_count: usize,
}

impl Default for MigrationStats {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            phase: MigrationPhase::Initializing,
            total_tables: 0,
            completed_tables: 0,
            failed_tables: 0,
            skipped_tables: 0,
            total_records: 0,
            processed_records: 0,
            errors_count: 0,
            warnings_count: 0,
        }
    }
}

impl MigrationStats {
    pub fn duration(&self) -> Option<f64> {
        elapsed_seconds(self.start_time, self.end_time)
    }

    pub fn overall_progress(&self) -> f64 {
        percentage(self.processed_records, self.total_records)
    }

    pub fn table_progress(&self) -> f64 {
        percentage(self.completed_tables as u64, self.total_tables as u64)
    }

    pub fn records_per_second(&self) -> f64 {
        rate(self.processed_records, self.duration())
    }
}

/// Notification pushed to an attached observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    PhaseChanged {
        from: MigrationPhase,
        to: MigrationPhase,
    },
    TableStarted {
        table: String,
        total_records: u64,
    },
    TableProgress {
        table: String,
        processed_records: u64,
        total_records: u64,
        current_batch: u64,
        total_batches: u64,
    },
    TableFinished {
        table: String,
        status: TableStatus,
        processed_records: u64,
        duration_seconds: f64,
        error: Option<String>,
    },
}

/// Table currently being migrated, as listed in a status summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTable {
    pub name: String,
    pub progress: f64,
    pub records: String,
    pub rate: f64,
}

/// Snapshot of the whole run for display or serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummary {
    pub phase: MigrationPhase,
    pub duration: Option<f64>,
    pub overall_progress: f64,
    pub table_progress: f64,
    pub total_tables: usize,
    pub completed_tables: usize,
    pub failed_tables: usize,
    pub skipped_tables: usize,
    pub total_records: u64,
    pub processed_records: u64,
    pub records_per_second: f64,
    pub errors_count: usize,
    pub warnings_count: usize,
    pub table_status_counts: BTreeMap<TableStatus, usize>,
    pub active_tables: Vec<ActiveTable>,
}

/// Batch position of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInfo {
    pub current_batch: u64,
    pub total_batches: u64,
}

/// Snapshot of one table for display or serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDetails {
    pub name: String,
    pub status: TableStatus,
    pub total_records: u64,
    pub processed_records: u64,
    pub progress_percentage: f64,
    pub duration: Option<f64>,
    pub records_per_second: f64,
    pub batch_info: Option<BatchInfo>,
    pub error_message: Option<String>,
}

#[derive(Default)]
struct Inner {
    stats: MigrationStats,
    tables: HashMap<String, TableProgress>,
    order: Vec<String>,
}

/// Thread-safe progress tracker.
#[derive(Default)]
pub struct ProgressTracker {
    inner: RwLock<Inner>,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push every state change to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is listening anymore
            let _ = tx.send(event);
        }
    }

    /// Register tables with their expected record totals.
    ///
    /// The first call starts the run clock. Names already registered are
    /// ignored, so the call can be repeated to add tables discovered later.
    pub fn register_tables<S: AsRef<str>>(&self, tables: &[(S, u64)]) {
        let mut inner = self.inner.write();
        if inner.stats.start_time.is_none() {
            inner.stats.start_time = Some(Utc::now());
        }
        for (name, total) in tables {
            let name = name.as_ref();
            if inner.tables.contains_key(name) {
                continue;
            }
            inner
                .tables
                .insert(name.to_string(), TableProgress::new(name, *total));
            inner.order.push(name.to_string());
            inner.stats.total_tables += 1;
            inner.stats.total_records += *total;
        }
    }

    /// Move to a later phase.
    ///
    /// Returns false, leaving the phase untouched, when the current phase is
    /// terminal or `phase` would move backwards.
    pub fn set_phase(&self, phase: MigrationPhase) -> bool {
        let from = {
            let mut inner = self.inner.write();
            let current = inner.stats.phase;
            if current == phase {
                return true;
            }
            if current.is_terminal() || phase < current {
                warn!("Ignoring phase change {} -> {}", current, phase);
                return false;
            }
            inner.stats.phase = phase;
            if phase.is_terminal() {
                inner.stats.end_time = Some(Utc::now());
            }
            current
        };

        info!("Phase changed: {} -> {}", from, phase);
        self.emit(ProgressEvent::PhaseChanged { from, to: phase });
        true
    }

    /// Mark a table as started. Unknown tables are ignored.
    pub fn start_table(&self, table: &str, total_records: u64) {
        {
            let mut inner = self.inner.write();
            let Some(progress) = inner.tables.get_mut(table) else {
                return;
            };
            if progress.status.is_finished() {
                return;
            }
            let previous_total = progress.total_records;
            let previous_processed = progress.processed_records;
            progress.status = TableStatus::InProgress;
            progress.total_records = total_records;
            progress.processed_records = 0;
            progress.start_time = Some(Utc::now());

            let stats = &mut inner.stats;
            stats.total_records = (stats.total_records + total_records).saturating_sub(previous_total);
            stats.processed_records = stats.processed_records.saturating_sub(previous_processed);
        }

        info!("Starting table '{}' ({} records)", table, total_records);
        self.emit(ProgressEvent::TableStarted {
            table: table.to_string(),
            total_records,
        });
    }

    /// Record the processed total and batch position of a table.
    pub fn update_table_progress(
        &self,
        table: &str,
        processed_records: u64,
        current_batch: u64,
        total_batches: u64,
    ) {
        let total_records = {
            let mut inner = self.inner.write();
            let Some(progress) = inner.tables.get_mut(table) else {
                return;
            };
            let old = progress.processed_records;
            progress.processed_records = processed_records;
            progress.current_batch = current_batch;
            progress.batch_count = total_batches;
            let total = progress.total_records;

            let stats = &mut inner.stats;
            stats.processed_records = (stats.processed_records + processed_records).saturating_sub(old);
            total
        };

        debug!(
            "Table '{}': batch {}/{} ({} of {} records)",
            table, current_batch, total_batches, processed_records, total_records
        );
        self.emit(ProgressEvent::TableProgress {
            table: table.to_string(),
            processed_records,
            total_records,
            current_batch,
            total_batches,
        });
    }

    /// Finish a table. Unknown or already finished tables are ignored.
    pub fn complete_table(&self, table: &str, success: bool, error_message: Option<String>) {
        self.finish_table(
            table,
            if success {
                TableStatus::Completed
            } else {
                TableStatus::Failed
            },
            error_message,
        );
    }

    /// Skip a table that never started. Unknown or finished tables are ignored.
    pub fn skip_table(&self, table: &str, reason: &str) {
        self.finish_table(table, TableStatus::Skipped, Some(reason.to_string()));
    }

    fn finish_table(&self, table: &str, status: TableStatus, error_message: Option<String>) {
        let event = {
            let mut inner = self.inner.write();
            let Some(progress) = inner.tables.get_mut(table) else {
                return;
            };
            if progress.status.is_finished() {
                return;
            }
            progress.status = status;
            progress.end_time = Some(Utc::now());
            progress.error_message = error_message.clone();

            let event = ProgressEvent::TableFinished {
                table: table.to_string(),
                status,
                processed_records: progress.processed_records,
                duration_seconds: progress.duration().unwrap_or(0.0),
                error: error_message,
            };

            match status {
                TableStatus::Completed => inner.stats.completed_tables += 1,
                TableStatus::Failed => inner.stats.failed_tables += 1,
                TableStatus::Skipped => inner.stats.skipped_tables += 1,
                TableStatus::Pending | TableStatus::InProgress => {}
            }
            event
        };

        if let ProgressEvent::TableFinished {
            processed_records,
            duration_seconds,
            error,
            ..
        } = &event
        {
            match status {
                TableStatus::Completed => info!(
                    "Table '{}' completed ({} records, {:.1}s)",
                    table, processed_records, duration_seconds
                ),
                TableStatus::Skipped => info!(
                    "Table '{}' skipped: {}",
                    table,
                    error.as_deref().unwrap_or("no reason given")
                ),
                _ => warn!(
                    "Table '{}' failed after {} records: {}",
                    table,
                    processed_records,
                    error.as_deref().unwrap_or("unknown error")
                ),
            }
        }
        self.emit(event);
    }

    pub fn add_error(&self) {
        self.inner.write().stats.errors_count += 1;
    }

    pub fn add_warning(&self) {
        self.inner.write().stats.warnings_count += 1;
    }

    /// Forget every table and counter.
    pub fn reset(&self) {
        *self.inner.write() = Inner::default();
    }

    pub fn phase(&self) -> MigrationPhase {
        self.inner.read().stats.phase
    }

    pub fn stats(&self) -> MigrationStats {
        self.inner.read().stats.clone()
    }

    pub fn table(&self, table: &str) -> Option<TableProgress> {
        self.inner.read().tables.get(table).cloned()
    }

    /// All tables in registration order.
    pub fn tables(&self) -> Vec<TableProgress> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.tables.get(name).cloned())
            .collect()
    }

    pub fn status_summary(&self) -> StatusSummary {
        let inner = self.inner.read();
        let stats = &inner.stats;

        let mut table_status_counts = BTreeMap::new();
        for progress in inner.tables.values() {
            *table_status_counts.entry(progress.status).or_insert(0) += 1;
        }

        let active_tables = inner
            .order
            .iter()
            .filter_map(|name| inner.tables.get(name))
            .filter(|p| p.status == TableStatus::InProgress)
            .map(|p| ActiveTable {
                name: p.name.clone(),
                progress: p.progress_percentage(),
                records: format!("{}/{}", p.processed_records, p.total_records),
                rate: p.records_per_second(),
            })
            .collect();

        StatusSummary {
            phase: stats.phase,
            duration: stats.duration(),
            overall_progress: stats.overall_progress(),
            table_progress: stats.table_progress(),
            total_tables: stats.total_tables,
            completed_tables: stats.completed_tables,
            failed_tables: stats.failed_tables,
            skipped_tables: stats.skipped_tables,
            total_records: stats.total_records,
            processed_records: stats.processed_records,
            records_per_second: stats.records_per_second(),
            errors_count: stats.errors_count,
            warnings_count: stats.warnings_count,
            table_status_counts,
            active_tables,
        }
    }

    pub fn table_details(&self, table: &str) -> Option<TableDetails> {
        let inner = self.inner.read();
        let p = inner.tables.get(table)?;
        Some(TableDetails {
            name: p.name.clone(),
            status: p.status,
            total_records: p.total_records,
            processed_records: p.processed_records,
            progress_percentage: p.progress_percentage(),
            duration: p.duration(),
            records_per_second: p.records_per_second(),
            batch_info: (p.batch_count > 0).then(|| BatchInfo {
                current_batch: p.current_batch,
                total_batches: p.batch_count,
            }),
            error_message: p.error_message.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(tables: &[(&str, u64)]) -> ProgressTracker {
        let tracker = ProgressTracker::new();
        tracker.register_tables(tables);
        tracker
    }

    #[test]
    fn test_phase_transitions_are_monotonic() {
        let tracker = ProgressTracker::new();
        assert!(tracker.set_phase(MigrationPhase::Connecting));
        assert!(tracker.set_phase(MigrationPhase::Migrating));
        assert!(!tracker.set_phase(MigrationPhase::Analyzing));
        assert_eq!(tracker.phase(), MigrationPhase::Migrating);
    }

    #[test]
    fn test_terminal_phase_is_final() {
        let tracker = ProgressTracker::new();
        assert!(tracker.set_phase(MigrationPhase::Completed));
        assert!(!tracker.set_phase(MigrationPhase::Failed));
        assert_eq!(tracker.phase(), MigrationPhase::Completed);
        assert!(tracker.stats().end_time.is_some());

        let tracker = ProgressTracker::new();
        tracker.set_phase(MigrationPhase::Migrating);
        assert!(tracker.set_phase(MigrationPhase::Failed));
        assert!(!tracker.set_phase(MigrationPhase::Completed));
    }

    #[test]
    fn test_unknown_tables_are_ignored() {
        let tracker = tracker_with(&[("orders", 10)]);
        tracker.start_table("ghost", 5);
        tracker.update_table_progress("ghost", 5, 1, 1);
        tracker.complete_table("ghost", true, None);
        tracker.skip_table("ghost", "filtered");
        let stats = tracker.stats();
        assert_eq!(stats.total_records, 10);
        assert_eq!(stats.processed_records, 0);
        assert_eq!(stats.completed_tables, 0);
        assert!(tracker.table("ghost").is_none());
    }

    #[test]
    fn test_aggregate_uses_deltas() {
        let tracker = tracker_with(&[("orders", 10), ("users", 4)]);
        tracker.start_table("orders", 10);
        tracker.update_table_progress("orders", 4, 1, 3);
        tracker.update_table_progress("orders", 8, 2, 3);
        tracker.update_table_progress("orders", 10, 3, 3);
        assert_eq!(tracker.stats().processed_records, 10);

        // re-counted total replaces the registered one
        tracker.start_table("users", 6);
        assert_eq!(tracker.stats().total_records, 16);
    }

    #[test]
    fn test_complete_is_idempotent() {
        let tracker = tracker_with(&[("orders", 1)]);
        tracker.start_table("orders", 1);
        tracker.complete_table("orders", true, None);
        tracker.complete_table("orders", false, Some("late".into()));
        tracker.skip_table("orders", "late");
        let stats = tracker.stats();
        assert_eq!(stats.completed_tables, 1);
        assert_eq!(stats.failed_tables, 0);
        assert_eq!(stats.skipped_tables, 0);
        assert_eq!(
            tracker.table("orders").map(|t| t.status),
            Some(TableStatus::Completed)
        );
    }

    #[test]
    fn test_zero_total_progress_is_zero() {
        let tracker = tracker_with(&[("empty", 0)]);
        tracker.start_table("empty", 0);
        tracker.complete_table("empty", true, None);
        let details = tracker.table_details("empty").unwrap();
        assert_eq!(details.progress_percentage, 0.0);
        assert_eq!(details.status, TableStatus::Completed);
    }

    #[test]
    fn test_status_summary() {
        let tracker = tracker_with(&[("a", 10), ("b", 10), ("c", 0)]);
        tracker.start_table("a", 10);
        tracker.update_table_progress("a", 5, 1, 2);
        tracker.start_table("b", 10);
        tracker.complete_table("b", false, Some("boom".into()));
        tracker.skip_table("c", "missing in target");
        tracker.add_error();
        tracker.add_warning();

        let summary = tracker.status_summary();
        assert_eq!(summary.total_tables, 3);
        assert_eq!(summary.failed_tables, 1);
        assert_eq!(summary.skipped_tables, 1);
        assert_eq!(summary.errors_count, 1);
        assert_eq!(summary.warnings_count, 1);
        assert_eq!(summary.overall_progress, 25.0);
        assert_eq!(summary.active_tables.len(), 1);
        assert_eq!(summary.active_tables[0].records, "5/10");
        assert_eq!(summary.table_status_counts[&TableStatus::InProgress], 1);

        let details = tracker.table_details("a").unwrap();
        let batch = details.batch_info.unwrap();
        assert_eq!((batch.current_batch, batch.total_batches), (1, 2));
        assert_eq!(
            tracker.table_details("b").unwrap().error_message.as_deref(),
            Some("boom")
        );
    }

    #[test]
    fn test_reset() {
        let tracker = tracker_with(&[("a", 10)]);
        tracker.set_phase(MigrationPhase::Completed);
        tracker.reset();
        assert_eq!(tracker.phase(), MigrationPhase::Initializing);
        assert!(tracker.tables().is_empty());
    }

    #[test]
    fn test_events_are_emitted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = ProgressTracker::new().with_events(tx);
        tracker.register_tables(&[("orders", 2)]);
        tracker.set_phase(MigrationPhase::Migrating);
        tracker.start_table("orders", 2);
        tracker.update_table_progress("orders", 2, 1, 1);
        tracker.complete_table("orders", true, None);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ProgressEvent::PhaseChanged { to: MigrationPhase::Migrating, .. }));
        assert!(matches!(
            &events[3],
            ProgressEvent::TableFinished { status: TableStatus::Completed, processed_records: 2, .. }
        ));

        let json = serde_json::to_value(&events[1]).unwrap();
        assert_eq!(json["event"], "table_started");
        assert_eq!(json["table"], "orders");
    }
}
