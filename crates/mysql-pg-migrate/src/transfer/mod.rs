//! Batch extract-transform-load of a single table.
//!
//! A table is read in `LIMIT/OFFSET` pages, each page is reshaped by the
//! [`RowTransformer`] and bulk-loaded with COPY. Batches run one after another
//! in index order; each batch is an independent unit of work on the target.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{Database, TableMapping};
use crate::error::{MigrateError, Result};
use crate::error_collector::{ErrorCategory, ErrorCollector};
use crate::progress::ProgressTracker;
use crate::reconcile::build_column_mapping;
use crate::schema_cache::SchemaCache;
use crate::source::SourcePool;
use crate::target::TargetPool;
use crate::transform::RowTransformer;

/// Batch loop settings.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Rows per batch.
    pub batch_size: usize,

    /// Skip failing batches instead of failing the table.
    pub continue_on_error: bool,
}

/// One page of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    /// Zero-based batch index.
    pub index: u64,
    pub offset: u64,
    pub limit: u64,
}

/// Number of pages needed for a table, never less than one.
pub fn batch_count(record_count: u64, batch_size: u64) -> u64 {
    record_count.div_ceil(batch_size.max(1)).max(1)
}

/// Split a table into pages, lazily.
///
/// Always yields at least one batch, so an empty table still gets one
/// harmless pass. Every batch uses the full `batch_size` as its limit.
pub fn plan_batches(record_count: u64, batch_size: u64) -> impl Iterator<Item = BatchRange> {
    let batch_size = batch_size.max(1);
    (0..batch_count(record_count, batch_size)).map(move |index| BatchRange {
        index,
        offset: index * batch_size,
        limit: batch_size,
    })
}

/// Outcome of one table.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// Rows written to the target.
    pub rows: u64,

    /// Batches planned.
    pub batches_total: u64,

    /// Batches written successfully.
    pub batches_succeeded: u64,

    /// Batches that failed.
    pub batches_failed: u64,

    /// Wall time spent on the table.
    pub duration: Duration,

    /// Whether the table ended COMPLETED.
    pub completed: bool,
}

/// Runs the batch loop for mapped tables.
pub struct TransferEngine {
    source: Arc<dyn SourcePool>,
    target: Arc<dyn TargetPool>,
    schemas: Arc<SchemaCache>,
    progress: Arc<ProgressTracker>,
    errors: Arc<ErrorCollector>,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(
        source: Arc<dyn SourcePool>,
        target: Arc<dyn TargetPool>,
        schemas: Arc<SchemaCache>,
        progress: Arc<ProgressTracker>,
        errors: Arc<ErrorCollector>,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            target,
            schemas,
            progress,
            errors,
            config,
        }
    }

    /// Migrate one table.
    ///
    /// Table-level failures are recorded and reported through the returned
    /// stats; the only error returned is [`MigrateError::Cancelled`], observed
    /// before each batch.
    pub async fn execute(
        &self,
        mapping: &TableMapping,
        cancel: &CancellationToken,
    ) -> Result<TransferStats> {
        let started = Instant::now();
        let table = mapping.source_table.as_str();
        let record_count = mapping.record_count.max(0) as u64;
        let mut stats = TransferStats::default();

        self.progress.start_table(table, record_count);

        let source_schema = self
            .schemas
            .get_schema(Database::Source, table, self.source.as_ref())
            .await;
        let target_schema = self
            .schemas
            .get_schema(Database::Target, &mapping.target_table, self.target.as_ref())
            .await;

        let (Some(source_schema), Some(target_schema)) = (source_schema, target_schema) else {
            let message = format!(
                "Could not get schemas for {} -> {}",
                table, mapping.target_table
            );
            return Ok(self.fail_table(table, ErrorCategory::SchemaAnalysis, message, stats, started));
        };

        let columns = build_column_mapping(&source_schema, &target_schema);
        if columns.is_empty() {
            let message = format!(
                "No matching columns between {} and {}",
                table, mapping.target_table
            );
            return Ok(self.fail_table(table, ErrorCategory::SchemaAnalysis, message, stats, started));
        }

        let transformer = RowTransformer::new(&source_schema, &target_schema, &columns);
        let source_columns = transformer.source_columns(&source_schema);
        let target_columns = transformer.target_columns();
        let target_table = target_schema.table_name.as_str();

        let batch_size = self.config.batch_size as u64;
        stats.batches_total = batch_count(record_count, batch_size);
        info!(
            "Migrating {} -> {}: {} rows in {} batches, {} columns",
            table,
            target_table,
            record_count,
            stats.batches_total,
            target_columns.len()
        );

        for batch in plan_batches(record_count, batch_size) {
            if cancel.is_cancelled() {
                self.progress
                    .complete_table(table, false, Some("Cancelled".to_string()));
                return Err(MigrateError::Cancelled);
            }

            let number = batch.index + 1;
            let result = async {
                let rows = self
                    .source
                    .read_batch(table, &source_columns, batch.offset, batch.limit)
                    .await?;
                let rows = rows
                    .into_iter()
                    .map(|row| transformer.transform_projected(row))
                    .collect();
                self.target.write_batch(target_table, target_columns, rows).await
            }
            .await;

            match result {
                Ok(written) => {
                    stats.rows += written;
                    stats.batches_succeeded += 1;
                    debug!(
                        "{}: batch {}/{} wrote {} rows",
                        table, number, stats.batches_total, written
                    );
                }
                Err(e) => {
                    stats.batches_failed += 1;
                    let message = format!("Batch {} failed: {}", number, e);
                    self.errors.add_table_error(
                        table,
                        ErrorCategory::MigrationError,
                        message.clone(),
                        false,
                    );
                    self.progress.add_warning();

                    if !self.config.continue_on_error {
                        self.progress.complete_table(table, false, Some(message));
                        stats.duration = started.elapsed();
                        return Ok(stats);
                    }
                    warn!("{}: continuing after failed batch {}", table, number);
                }
            }

            self.progress.update_table_progress(
                table,
                stats.rows.min(record_count),
                number,
                stats.batches_total,
            );
        }

        stats.duration = started.elapsed();
        if stats.batches_succeeded == 0 {
            let message = format!("All {} batches failed", stats.batches_total);
            self.progress.complete_table(table, false, Some(message));
            return Ok(stats);
        }

        stats.completed = true;
        let error = (stats.batches_failed > 0)
            .then(|| format!("{} of {} batches failed", stats.batches_failed, stats.batches_total));
        self.progress.complete_table(table, true, error);
        Ok(stats)
    }

    fn fail_table(
        &self,
        table: &str,
        category: ErrorCategory,
        message: String,
        mut stats: TransferStats,
        started: Instant,
    ) -> TransferStats {
        self.errors.add_table_error(table, category, message.clone(), true);
        self.progress.add_error();
        self.progress.complete_table(table, false, Some(message));
        stats.duration = started.elapsed();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(batches: &[BatchRange], record_count: u64) -> Vec<u64> {
        let mut rows = Vec::new();
        for b in batches {
            rows.extend((b.offset..b.offset + b.limit).filter(|r| *r < record_count));
        }
        rows
    }

    #[test]
    fn test_plan_zero_rows_is_one_batch() {
        assert_eq!(
            plan_batches(0, 100).collect::<Vec<_>>(),
            vec![BatchRange {
                index: 0,
                offset: 0,
                limit: 100
            }]
        );
    }

    #[test]
    fn test_plan_batch_counts() {
        assert_eq!(batch_count(10, 100), 1);
        assert_eq!(batch_count(100, 100), 1);
        assert_eq!(batch_count(101, 100), 2);
        assert_eq!(batch_count(10, 3), 4);
        assert_eq!(plan_batches(10, 3).count(), 4);
    }

    #[test]
    fn test_plan_huge_table_is_lazy() {
        let record_count = 1_000_000_000_000u64;
        assert_eq!(batch_count(record_count, 100), 10_000_000_000);

        let last = plan_batches(record_count, 100).nth(9_999_999_999).unwrap();
        assert_eq!(last.offset, record_count - 100);
        assert!(plan_batches(record_count, 100).nth(10_000_000_000).is_none());
    }

    #[test]
    fn test_plan_tiles_without_gaps_or_overlaps() {
        for record_count in [0u64, 1, 7, 99, 100, 101, 1000, 1234] {
            for batch_size in [1u64, 3, 100, 999] {
                let batches: Vec<_> = plan_batches(record_count, batch_size).collect();
                let expected = record_count.div_ceil(batch_size).max(1);
                assert_eq!(batches.len() as u64, expected);
                let rows = covered(&batches, record_count);
                assert_eq!(rows, (0..record_count).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_plan_indices_and_offsets() {
        let offsets: Vec<_> = plan_batches(250, 100).map(|b| (b.index, b.offset)).collect();
        assert_eq!(offsets, vec![(0, 0), (1, 100), (2, 200)]);
    }
}
