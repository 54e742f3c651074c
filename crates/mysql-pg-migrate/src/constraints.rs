//! Suspension and restoration of referential integrity on the target.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::core::TableMapping;
use crate::error_collector::{ErrorCategory, ErrorCollector};
use crate::target::TargetPool;

/// Tracks which target tables had their triggers disabled.
///
/// Failures never abort the run: they are recorded as warnings and the
/// bookkeeping stays accurate, so [`restore_integrity`](Self::restore_integrity)
/// only touches tables that were actually suspended.
pub struct ConstraintManager {
    target: Arc<dyn TargetPool>,
    errors: Arc<ErrorCollector>,
    enabled: bool,
    suspended: Mutex<BTreeSet<String>>,
}

impl ConstraintManager {
    pub fn new(target: Arc<dyn TargetPool>, errors: Arc<ErrorCollector>, enabled: bool) -> Self {
        Self {
            target,
            errors,
            enabled,
            suspended: Mutex::new(BTreeSet::new()),
        }
    }

    /// Disable triggers on every target table that has a foreign key.
    ///
    /// Returns true when nothing failed, including when suspension is turned
    /// off by configuration.
    pub async fn suspend_integrity(&self) -> bool {
        if !self.enabled {
            debug!("Foreign key suspension disabled in configuration");
            return true;
        }

        let tables = match self.target.tables_with_foreign_keys().await {
            Ok(tables) => tables,
            Err(e) => {
                self.warn(None, format!("Failed to list foreign keys: {}", e));
                return false;
            }
        };

        if tables.is_empty() {
            info!("No foreign key constraints to suspend");
            return true;
        }

        let mut ok = true;
        for table in tables {
            if self.suspended.lock().contains(&table) {
                continue;
            }
            match self.target.disable_triggers(&table).await {
                Ok(()) => {
                    self.suspended.lock().insert(table);
                }
                Err(e) => {
                    ok = false;
                    self.warn(
                        Some(&table),
                        format!("Failed to disable triggers on '{}': {}", table, e),
                    );
                }
            }
        }

        info!(
            "Suspended foreign key enforcement on {} tables",
            self.suspended.lock().len()
        );
        ok
    }

    /// Re-enable triggers on the tables suspended earlier.
    ///
    /// Tables restored successfully are forgotten, so calling this again only
    /// retries the ones that failed.
    pub async fn restore_integrity(&self) -> bool {
        let tables: Vec<String> = self.suspended.lock().iter().cloned().collect();
        if tables.is_empty() {
            debug!("No foreign key constraints to restore");
            return true;
        }

        let mut ok = true;
        for table in tables {
            match self.target.enable_triggers(&table).await {
                Ok(()) => {
                    self.suspended.lock().remove(&table);
                }
                Err(e) => {
                    ok = false;
                    self.warn(
                        Some(&table),
                        format!("Failed to re-enable triggers on '{}': {}", table, e),
                    );
                }
            }
        }

        if ok {
            info!("Restored foreign key enforcement");
        }
        ok
    }

    /// Empty every mapped target table, resetting identity sequences.
    ///
    /// Destructive; the caller only invokes this when the operator opted in.
    /// Returns the number of tables truncated.
    pub async fn truncate_targets(&self, mappings: &[TableMapping]) -> usize {
        let mut truncated = 0;
        for mapping in mappings {
            match self.target.truncate_table(&mapping.target_table).await {
                Ok(()) => {
                    info!("Truncated target table '{}'", mapping.target_table);
                    truncated += 1;
                }
                Err(e) => self.errors.add_table_error(
                    &mapping.target_table,
                    ErrorCategory::MigrationError,
                    format!("Failed to truncate '{}': {}", mapping.target_table, e),
                    false,
                ),
            }
        }
        truncated
    }

    /// Tables currently suspended.
    pub fn suspended_tables(&self) -> Vec<String> {
        self.suspended.lock().iter().cloned().collect()
    }

    fn warn(&self, table: Option<&str>, message: String) {
        self.errors
            .add_error(ErrorCategory::MigrationError, message, table, false, None);
    }
}
