//! Timestamp normalization.
//!
//! Every supported engine accepts `YYYY-MM-DD HH:MM:SS[.fff]`. Inputs are
//! reduced to that form:
//! - integers are Unix-epoch milliseconds
//! - ISO-8601 text with `T` separators, trailing `Z` or numeric offsets
//! - native temporal values
//!
//! Offset-bearing inputs are converted to UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::core::SqlValue;

/// Output format; `%.f` prints nothing when the fraction is zero.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Normalize a value to the canonical timestamp text, if it denotes a point in time.
pub fn normalize(value: &SqlValue<'_>) -> Option<String> {
    to_naive(value).map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
}

/// Interpret a value as a UTC-naive timestamp.
pub fn to_naive(value: &SqlValue<'_>) -> Option<NaiveDateTime> {
    match value {
        SqlValue::Int(ms) => from_epoch_millis(*ms),
        SqlValue::Float(ms) if ms.is_finite() => from_epoch_millis(ms.trunc() as i64),
        SqlValue::DateTime(ts) => Some(*ts),
        SqlValue::DateTimeOffset(ts) => Some(ts.with_timezone(&Utc).naive_utc()),
        SqlValue::Date(d) => d.and_hms_opt(0, 0, 0),
        SqlValue::Text(s) => parse_text(s),
        _ => None,
    }
}

fn from_epoch_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// Parse timestamp text in any of the accepted spellings.
pub fn parse_text(text: &str) -> Option<NaiveDateTime> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }

    if s.bytes().all(|b| b.is_ascii_digit() || b == b'-') && s.len() > 10 {
        return s.parse::<i64>().ok().and_then(from_epoch_millis);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc).naive_utc());
        }
    }

    let without_z = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')).unwrap_or(s);
    for fmt in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(without_z, fmt) {
            return Some(ts);
        }
    }

    NaiveDate::parse_from_str(without_z, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
