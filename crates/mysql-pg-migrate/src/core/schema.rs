//! Schema metadata shared by the reconciler, the schema cache and the drivers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the migration a catalog belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Database {
    /// The MySQL source.
    Source,
    /// The PostgreSQL target.
    Target,
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Database::Source => write!(f, "MySQL"),
            Database::Target => write!(f, "PostgreSQL"),
        }
    }
}

/// Column metadata as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Declared type as the catalog spells it (e.g. "tinyint", "ARRAY", "jsonb").
    pub data_type: String,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Whether the value is computed by the database.
    pub is_generated: bool,
}

impl ColumnDescriptor {
    /// Create a plain nullable, non-generated column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            is_generated: false,
        }
    }
}

/// Immutable snapshot of a table's columns, built once per table per database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name as actually present in the catalog.
    pub table_name: String,

    /// Columns in ordinal order.
    pub columns: Vec<ColumnDescriptor>,

    /// Column names in the same order, for lookups.
    pub column_names: Vec<String>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        let column_names = columns.iter().map(|c| c.name.clone()).collect();
        Self {
            table_name: table_name.into(),
            columns,
            column_names,
        }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A resolved source to target table pairing discovered during analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    /// Source (MySQL) table name.
    pub source_table: String,

    /// Target (PostgreSQL) table name as present in the target catalog.
    pub target_table: String,

    /// Row count of the source table at analysis time.
    pub record_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_schema_names_follow_columns() {
        let schema = TableSchema::new(
            "Orders",
            vec![
                ColumnDescriptor::new("id", "integer"),
                ColumnDescriptor::new("total", "numeric"),
            ],
        );
        assert_eq!(schema.column_names, vec!["id", "total"]);
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_database_display() {
        assert_eq!(Database::Source.to_string(), "MySQL");
        assert_eq!(Database::Target.to_string(), "PostgreSQL");
    }
}
