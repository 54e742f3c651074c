//! Per-value conversion from source representation to target column type.

use serde_json::Value;
use tracing::debug;

use crate::core::{ColumnDescriptor, Row, SqlValue, TableSchema};
use crate::reconcile::ColumnMapping;

/// Broad family of a target column type, as far as value conversion cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Boolean,
    Temporal,
    Json,
    Array,
    Numeric,
    Other,
}

impl TargetKind {
    /// Classify a declared type name. Checks run in rule order, first hit wins.
    pub fn classify(data_type: &str) -> Self {
        let t = data_type.to_lowercase();
        if t.contains("bool") {
            TargetKind::Boolean
        } else if t.contains("date") || t.contains("time") || t.contains("interval") {
            TargetKind::Temporal
        } else if t.contains("json") {
            TargetKind::Json
        } else if t.contains("array") || t.ends_with("[]") {
            TargetKind::Array
        } else if t.contains("numeric") || t.contains("decimal") {
            TargetKind::Numeric
        } else {
            TargetKind::Other
        }
    }
}

/// Convert one value for the target column.
///
/// NULL always stays NULL. Otherwise, by target kind:
/// booleans accept numbers and numeric strings (non-zero is true);
/// temporal and JSON strings pass through;
/// JSON-array strings become PostgreSQL array literals;
/// numeric-looking strings become floats for numeric columns.
/// Everything else passes through unchanged.
pub fn transform_value(
    value: SqlValue,
    _source: &ColumnDescriptor,
    target: &ColumnDescriptor,
) -> SqlValue {
    transform_for_kind(value, TargetKind::classify(&target.data_type), &target.name)
}

fn transform_for_kind(value: SqlValue, kind: TargetKind, column: &str) -> SqlValue {
    if value.is_null() {
        return value;
    }

    match kind {
        TargetKind::Boolean => {
            if let Some(nonzero) = value.is_nonzero() {
                return SqlValue::Bool(nonzero);
            }
            if let Some(n) = value.as_str().and_then(parse_numeric_str) {
                return SqlValue::Bool(n != 0.0);
            }
            value
        }
        TargetKind::Temporal | TargetKind::Json | TargetKind::Other => value,
        TargetKind::Array => match value {
            SqlValue::String(s) => match json_array_to_pg_literal(&s) {
                Some(literal) => SqlValue::String(literal),
                None => {
                    debug!(
                        "Column '{}': value is not a JSON array, passing through as text",
                        column
                    );
                    SqlValue::String(s)
                }
            },
            other => other,
        },
        TargetKind::Numeric => match value.as_str().and_then(parse_numeric_str) {
            Some(n) => SqlValue::F64(n),
            None => value,
        },
    }
}

/// Parse a string made only of digits, dots and minus signs.
fn parse_numeric_str(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-') {
        return None;
    }
    s.parse().ok()
}

/// Re-encode a JSON array string as a PostgreSQL array literal.
///
/// `["a","b"]` becomes `{"a","b"}`, `[]` becomes `{}`. Returns `None` when the
/// input is not a JSON array.
pub fn json_array_to_pg_literal(s: &str) -> Option<String> {
    match serde_json::from_str::<Value>(s.trim()) {
        Ok(Value::Array(items)) => Some(encode_array(&items)),
        _ => None,
    }
}

fn encode_array(items: &[Value]) -> String {
    let elements: Vec<String> = items.iter().map(encode_element).collect();
    format!("{{{}}}", elements.join(","))
}

fn encode_element(item: &Value) -> String {
    match item {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_element(s),
        Value::Array(nested) => encode_array(nested),
        Value::Object(_) => quote_element(&item.to_string()),
    }
}

fn quote_element(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Reorders and converts source rows into target rows for one table.
///
/// The kind of every mapped target column is resolved once, so per-row work
/// is a single pass over the precomputed pairs.
pub struct RowTransformer {
    /// `(source_index, target_kind)` in target column order.
    plan: Vec<(usize, TargetKind)>,
    target_columns: Vec<String>,
}

impl RowTransformer {
    pub fn new(source: &TableSchema, target: &TableSchema, mapping: &ColumnMapping) -> Self {
        let ordered = mapping.by_target_order();
        let plan = ordered
            .iter()
            .map(|&(s, t)| (s, TargetKind::classify(&target.columns[t].data_type)))
            .collect();
        let target_columns = ordered
            .iter()
            .map(|&(_, t)| target.column_names[t].clone())
            .collect();
        debug!(
            "Transform plan for {} -> {}: {} of {} source columns mapped",
            source.table_name,
            target.table_name,
            ordered.len(),
            source.len()
        );
        Self {
            plan,
            target_columns,
        }
    }

    /// Target column names, in the order values are produced.
    pub fn target_columns(&self) -> &[String] {
        &self.target_columns
    }

    /// Source columns to extract, given the source schema.
    pub fn source_columns(&self, source: &TableSchema) -> Vec<String> {
        self.plan
            .iter()
            .map(|&(s, _)| source.column_names[s].clone())
            .collect()
    }

    /// Count values in a full-width source row that would reach an array
    /// column as opaque text because they are not JSON arrays.
    pub fn count_array_fallbacks(&self, row: &Row) -> usize {
        self.plan
            .iter()
            .filter(|(_, kind)| *kind == TargetKind::Array)
            .filter_map(|&(s, _)| row.get(s).and_then(SqlValue::as_str))
            .filter(|text| json_array_to_pg_literal(text).is_none())
            .count()
    }

    /// Convert a row read with [`source_columns`](Self::source_columns), i.e.
    /// already in target order.
    pub fn transform_projected(&self, row: Row) -> Row {
        row.into_iter()
            .zip(self.plan.iter().zip(&self.target_columns))
            .map(|(value, (&(_, kind), column))| transform_for_kind(value, kind, column))
            .collect()
    }
}
