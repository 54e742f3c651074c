//! SQL value types for database-agnostic data transfer.
//!
//! Values are extracted from the source into [`SqlValue`], reshaped by the
//! value transformer, and rendered into the target's COPY text format.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;

/// A single extracted cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    Bool(bool),
    I64(i64),
    /// Unsigned integers that may not fit in `i64` (MySQL `BIGINT UNSIGNED`).
    U64(u64),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
}

/// One extracted row, ordered like the schema it was read with.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    /// Check if this value is NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Check if this value holds a number.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlValue::I64(_) | SqlValue::U64(_) | SqlValue::F64(_) | SqlValue::Decimal(_)
        )
    }

    /// Whether a numeric value is non-zero. `None` for non-numeric values.
    pub fn is_nonzero(&self) -> Option<bool> {
        match self {
            SqlValue::I64(n) => Some(*n != 0),
            SqlValue::U64(n) => Some(*n != 0),
            SqlValue::F64(n) => Some(*n != 0.0),
            SqlValue::Decimal(d) => Some(!d.is_zero()),
            _ => None,
        }
    }

    /// Borrow the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::String(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::String(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::I64(n)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}
