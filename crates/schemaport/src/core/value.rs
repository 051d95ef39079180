//! In-memory value representation for rows read from any supported engine.
//!
//! Drivers normalize native values into [`SqlValue`]; the value converter turns
//! them back into dialect-correct literals.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

/// SQL value with zero-copy support for text and binary payloads.
///
/// # Example
///
/// ```rust
/// use std::borrow::Cow;
/// use schemaport::core::SqlValue;
///
/// let borrowed: SqlValue<'_> = SqlValue::Text(Cow::Borrowed("hello"));
/// let owned: SqlValue<'static> = borrowed.into_owned();
/// assert!(!owned.is_null());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// SQL NULL.
    Null,

    /// Native boolean.
    Bool(bool),

    /// Any integer width, widened to 64 bits.
    Int(i64),

    /// Any floating point width, widened to 64 bits.
    Float(f64),

    /// Exact numeric.
    Decimal(Decimal),

    /// Text data.
    Text(Cow<'a, str>),

    /// Binary data.
    Bytes(Cow<'a, [u8]>),

    /// UUID value.
    Uuid(Uuid),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),

    /// Structured JSON document.
    Json(serde_json::Value),

    /// Native array (PostgreSQL array columns).
    Array(Vec<SqlValue<'a>>),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null => SqlValue::Null,
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::Int(v) => SqlValue::Int(v),
            SqlValue::Float(v) => SqlValue::Float(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Uuid(v) => SqlValue::Uuid(v),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::Time(v) => SqlValue::Time(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
            SqlValue::Json(v) => SqlValue::Json(v),
            SqlValue::Array(items) => {
                SqlValue::Array(items.into_iter().map(SqlValue::into_owned).collect())
            }
        }
    }

    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view of the value, when it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    /// Text view of the value, when it is stored as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// Create a text value from an owned String.
    #[must_use]
    pub fn text_owned(s: String) -> SqlValue<'static> {
        SqlValue::Text(Cow::Owned(s))
    }

    /// Create a bytes value from an owned Vec<u8>.
    #[must_use]
    pub fn bytes_owned(b: Vec<u8>) -> SqlValue<'static> {
        SqlValue::Bytes(Cow::Owned(b))
    }
}

impl From<bool> for SqlValue<'static> {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue<'static> {
    fn from(v: i32) -> Self {
        SqlValue::Int(i64::from(v))
    }
}

impl From<i64> for SqlValue<'static> {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue<'static> {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for SqlValue<'a> {
    fn from(v: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(v))
    }
}

impl From<Vec<u8>> for SqlValue<'static> {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(Cow::Owned(v))
    }
}

impl From<Uuid> for SqlValue<'static> {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<NaiveDateTime> for SqlValue<'static> {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<serde_json::Value> for SqlValue<'static> {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl<T: Into<SqlValue<'static>>> From<Option<T>> for SqlValue<'static> {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// Result set returned by [`Connection::query`](crate::core::Connection::query).
///
/// Rows are positional; `columns` names each position. An empty result may have
/// no column names, since some drivers only report them alongside rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    /// Column names in select order.
    pub columns: Vec<String>,

    /// Row values, one vector per row, aligned with `columns`.
    pub rows: Vec<Vec<SqlValue<'static>>>,
}

impl Rows {
    /// Create a result set.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue<'static>>>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value of `column` in row `row`.
    pub fn get(&self, row: usize, column: &str) -> Option<&SqlValue<'static>> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Text value of `column` in row `row` (integers are rendered as text).
    pub fn get_string(&self, row: usize, column: &str) -> Option<String> {
        match self.get(row, column)? {
            SqlValue::Text(s) => Some(s.to_string()),
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Bytes(b) => String::from_utf8(b.to_vec()).ok(),
            _ => None,
        }
    }

    /// Integer value of `column` in row `row`.
    pub fn get_i64(&self, row: usize, column: &str) -> Option<i64> {
        self.get(row, column)?.as_i64()
    }

    /// Single integer produced by a scalar query such as `SELECT COUNT(*)`.
    pub fn scalar_i64(&self) -> Option<i64> {
        self.rows.first()?.first()?.as_i64()
    }

    /// Row `row` as a column-name keyed map.
    pub fn row_map(&self, row: usize) -> HashMap<String, SqlValue<'static>> {
        match self.rows.get(row) {
            Some(values) => self
                .columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect(),
            None => HashMap::new(),
        }
    }
}
