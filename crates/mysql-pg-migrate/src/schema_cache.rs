//! Memoized table schemas, keyed by database and table name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::core::{Catalog, Database, TableSchema};
use crate::error::Result;
use crate::error_collector::ErrorCollector;
use crate::reconcile::resolve_target_table;

/// Cache of [`TableSchema`] snapshots for one run.
pub struct SchemaCache {
    entries: RwLock<HashMap<(Database, String), Arc<TableSchema>>>,
    ignore_generated: bool,
    errors: Arc<ErrorCollector>,
}

impl SchemaCache {
    pub fn new(ignore_generated: bool, errors: Arc<ErrorCollector>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ignore_generated,
            errors,
        }
    }

    /// Return the schema of `table`, querying `catalog` on a miss.
    ///
    /// The requested name is resolved against the catalog's table list with
    /// the same rules as table mapping, so `orders` finds `Orders`. The result
    /// is stored under both spellings. Lookup failures are recorded as
    /// non-critical schema errors and yield `None`; nothing is retried.
    pub async fn get_schema<C>(
        &self,
        db: Database,
        table: &str,
        catalog: &C,
    ) -> Option<Arc<TableSchema>>
    where
        C: Catalog + ?Sized,
    {
        if let Some(hit) = self.entries.read().get(&(db, table.to_string())) {
            return Some(Arc::clone(hit));
        }

        match self.load(db, table, catalog).await {
            Ok(Some(schema)) => {
                let schema = Arc::new(schema);
                let mut entries = self.entries.write();
                entries.insert((db, table.to_string()), Arc::clone(&schema));
                if schema.table_name != table {
                    entries.insert((db, schema.table_name.clone()), Arc::clone(&schema));
                }
                debug!(
                    "Cached {} schema for '{}' ({} columns)",
                    db,
                    schema.table_name,
                    schema.len()
                );
                Some(schema)
            }
            Ok(None) => None,
            Err(e) => {
                self.errors.add_schema_error(
                    table,
                    format!("Failed to get {} schema for table '{}': {}", db, table, e),
                    false,
                );
                None
            }
        }
    }

    async fn load<C>(&self, db: Database, table: &str, catalog: &C) -> Result<Option<TableSchema>>
    where
        C: Catalog + ?Sized,
    {
        let tables = catalog.list_tables().await?;
        let Some(actual) = resolve_target_table(table, &tables) else {
            warn!("Table '{}' not found in {}", table, db);
            return Ok(None);
        };
        let actual = actual.to_string();

        let columns: Vec<_> = catalog
            .describe_table(&actual)
            .await?
            .into_iter()
            .filter(|c| !(self.ignore_generated && c.is_generated))
            .collect();

        if columns.is_empty() {
            warn!("No columns found for table '{}' in {}", actual, db);
            return Ok(None);
        }

        Ok(Some(TableSchema::new(actual, columns)))
    }

    /// Drop every cached schema.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
