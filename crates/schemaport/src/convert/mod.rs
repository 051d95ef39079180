//! Value conversion between in-memory values and dialect literals.
//!
//! [`to_literal`] renders a value as a literal for a target dialect, guided by
//! the column's [`ColumnTypeInfo`]. It never fails: combinations it cannot
//! interpret fall back to [`generic_literal`], which quotes by the value's own
//! runtime type. Callers that need cross-dialect fidelity must supply type info.
//!
//! [`parse_literal`] is the inverse, used to read literals back.

pub mod timestamp;

use std::borrow::Cow;

use rust_decimal::Decimal;

use crate::core::traits::Dialect;
use crate::core::{ColumnTypeInfo, DatabaseKind, LogicalType, SqlValue};

/// Render `value` as a literal for `dialect`.
///
/// `NULL` is emitted for null values regardless of type.
pub fn to_literal(
    value: &SqlValue<'_>,
    column: Option<&ColumnTypeInfo>,
    dialect: &dyn Dialect,
) -> String {
    if value.is_null() {
        return "NULL".into();
    }
    let Some(column) = column else {
        return generic_literal(value, dialect);
    };

    let typed = match column.logical_type {
        LogicalType::Boolean => {
            as_bool(value).map(|b| dialect.boolean_literal(Some(b)))
        }
        LogicalType::Integer => integer_literal(value),
        LogicalType::Float => float_literal(value),
        LogicalType::Text => None,
        LogicalType::Timestamp => {
            timestamp::normalize(value).map(|ts| dialect.timestamp_cast(&ts))
        }
        LogicalType::Binary => match value {
            SqlValue::Bytes(b) => Some(dialect.blob_literal(b)),
            SqlValue::Text(s) => Some(dialect.blob_literal(s.as_bytes())),
            _ => None,
        },
        LogicalType::Json => Some(dialect.json_literal(&to_json(value).to_string())),
        LogicalType::Array => Some(array_literal(value, column.native_array, dialect)),
        LogicalType::Enum => Some(dialect.quote_string(&display_text(value))),
    };

    typed.unwrap_or_else(|| generic_literal(value, dialect))
}

/// Render `value` so that re-inserting it into the engine it was read from
/// stores the same bytes.
///
/// Text values keep their exact spelling; a timestamp stored as
/// `2024-01-01T00:00:00Z` text is not renormalized.
pub fn preserving_literal(
    value: &SqlValue<'_>,
    column: Option<&ColumnTypeInfo>,
    dialect: &dyn Dialect,
) -> String {
    let (SqlValue::Text(text), Some(column)) = (value, column) else {
        return to_literal(value, column, dialect);
    };
    match column.logical_type {
        LogicalType::Timestamp => dialect.timestamp_cast(text),
        LogicalType::Json => dialect.json_literal(text),
        LogicalType::Array if !column.native_array => dialect.json_literal(text),
        LogicalType::Array => to_literal(value, Some(column), dialect),
        _ => dialect.quote_string(text),
    }
}

/// Literal chosen from the value's own runtime type.
pub fn generic_literal(value: &SqlValue<'_>, dialect: &dyn Dialect) -> String {
    match value {
        SqlValue::Null => "NULL".into(),
        SqlValue::Bool(b) => dialect.boolean_literal(Some(*b)),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::Float(v) if v.is_finite() => format!("{:?}", v),
        SqlValue::Float(v) => dialect.quote_string(&v.to_string()),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Text(s) => dialect.quote_string(s),
        SqlValue::Bytes(b) => dialect.blob_literal(b),
        SqlValue::Json(_) | SqlValue::Array(_) => {
            dialect.json_literal(&to_json(value).to_string())
        }
        SqlValue::Uuid(_)
        | SqlValue::Date(_)
        | SqlValue::Time(_)
        | SqlValue::DateTime(_)
        | SqlValue::DateTimeOffset(_) => dialect.quote_string(&display_text(value)),
    }
}

/// Truthiness of a boolean-ish value; `None` when it is not recognizably boolean.
pub fn as_bool(value: &SqlValue<'_>) -> Option<bool> {
    match value {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Int(v) => Some(*v != 0),
        SqlValue::Float(v) => Some(*v != 0.0),
        SqlValue::Decimal(d) => Some(!d.is_zero()),
        SqlValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
            "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// 2^63 as a float; every integral float below it fits in an i64.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn integer_literal(value: &SqlValue<'_>) -> Option<String> {
    match value {
        SqlValue::Int(v) => Some(v.to_string()),
        SqlValue::Bool(b) => Some(i64::from(*b).to_string()),
        // `as i64` saturates outside the i64 range; spell those out instead.
        SqlValue::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(
            if v.abs() < I64_LIMIT {
                (*v as i64).to_string()
            } else {
                format!("{:.0}", v)
            },
        ),
        SqlValue::Decimal(d) if d.fract().is_zero() => Some(d.trunc().to_string()),
        SqlValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(|v| v.to_string())
                .or_else(|_| s.parse::<u64>().map(|v| v.to_string()))
                .ok()
        }
        _ => None,
    }
}

fn float_literal(value: &SqlValue<'_>) -> Option<String> {
    match value {
        SqlValue::Float(v) if v.is_finite() => Some(format!("{:?}", v)),
        SqlValue::Int(v) => Some(v.to_string()),
        SqlValue::Decimal(d) => Some(d.to_string()),
        SqlValue::Bool(b) => Some(i64::from(*b).to_string()),
        // keep the original digits; parsing through f64 would lose precision
        SqlValue::Text(s) if s.trim().parse::<f64>().is_ok_and(f64::is_finite) => {
            Some(s.trim().to_string())
        }
        _ => None,
    }
}

fn array_literal(value: &SqlValue<'_>, native: bool, dialect: &dyn Dialect) -> String {
    if native {
        let elements = match value {
            SqlValue::Array(items) => Some(
                items
                    .iter()
                    .map(|item| generic_literal(item, dialect))
                    .collect::<Vec<_>>(),
            ),
            _ => match to_json(value) {
                serde_json::Value::Array(items) => Some(
                    items
                        .iter()
                        .map(|item| json_element_literal(item, dialect))
                        .collect(),
                ),
                _ => None,
            },
        };
        if let Some(literal) = elements.and_then(|e| dialect.array_literal(&e)) {
            return literal;
        }
    }
    dialect.json_literal(&to_json(value).to_string())
}

fn json_element_literal(value: &serde_json::Value, dialect: &dyn Dialect) -> String {
    match value {
        serde_json::Value::Null => "NULL".into(),
        serde_json::Value::Bool(b) => dialect.boolean_literal(Some(*b)),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => dialect.quote_string(s),
        other => dialect.quote_string(&other.to_string()),
    }
}

/// JSON view of a value.
///
/// Text holding a JSON document is parsed (and later re-serialized compactly);
/// any other text becomes a JSON string.
pub fn to_json(value: &SqlValue<'_>) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        SqlValue::Null => J::Null,
        SqlValue::Bool(b) => J::Bool(*b),
        SqlValue::Int(v) => J::from(*v),
        SqlValue::Float(v) => serde_json::Number::from_f64(*v).map_or(J::Null, J::Number),
        SqlValue::Decimal(d) => serde_json::from_str(&d.to_string())
            .unwrap_or_else(|_| J::String(d.to_string())),
        SqlValue::Text(s) => serde_json::from_str(s).unwrap_or_else(|_| J::String(s.to_string())),
        SqlValue::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) => serde_json::from_str(s).unwrap_or_else(|_| J::String(s.to_string())),
            Err(_) => J::String(hex::encode(b.as_ref())),
        },
        SqlValue::Json(v) => v.clone(),
        SqlValue::Array(items) => J::Array(items.iter().map(to_json).collect()),
        SqlValue::Uuid(_)
        | SqlValue::Date(_)
        | SqlValue::Time(_)
        | SqlValue::DateTime(_)
        | SqlValue::DateTimeOffset(_) => J::String(display_text(value)),
    }
}

/// Plain text rendering used for quoted fallbacks.
fn display_text(value: &SqlValue<'_>) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::Float(v) => v.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Text(s) => s.to_string(),
        SqlValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        SqlValue::Uuid(u) => u.to_string(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        SqlValue::DateTime(ts) => ts.format(timestamp::TIMESTAMP_FORMAT).to_string(),
        SqlValue::DateTimeOffset(ts) => ts.to_rfc3339(),
        SqlValue::Json(v) => v.to_string(),
        SqlValue::Array(_) => to_json(value).to_string(),
    }
}

/// Parse a literal produced for `dialect` back into a value.
///
/// Unrecognized literals are returned as text.
pub fn parse_literal(literal: &str, column: &ColumnTypeInfo, dialect: &dyn Dialect) -> SqlValue<'static> {
    let literal = literal.trim();
    if literal.eq_ignore_ascii_case("NULL") {
        return SqlValue::Null;
    }

    if let Some(bytes) = parse_blob(literal) {
        return SqlValue::bytes_owned(bytes);
    }

    if column.logical_type == LogicalType::Array {
        if let Some(inner) = literal
            .strip_prefix("ARRAY[")
            .and_then(|s| s.strip_suffix(']'))
        {
            let element = ColumnTypeInfo::new(column.name.clone(), LogicalType::Text);
            return SqlValue::Array(
                split_top_level(inner)
                    .iter()
                    .map(|item| parse_scalar(item, &element, dialect))
                    .collect(),
            );
        }
    }

    let body = strip_cast(literal);
    match unquote_literal(body, dialect) {
        Some(text) => parse_text(text, column),
        None => parse_scalar(body, column, dialect),
    }
}

fn parse_scalar(literal: &str, column: &ColumnTypeInfo, dialect: &dyn Dialect) -> SqlValue<'static> {
    let literal = literal.trim();
    if literal.eq_ignore_ascii_case("NULL") {
        return SqlValue::Null;
    }
    if let Some(text) = unquote_literal(strip_cast(literal), dialect) {
        return parse_text(text, column);
    }
    match column.logical_type {
        LogicalType::Boolean => match literal.to_uppercase().as_str() {
            "TRUE" | "1" => SqlValue::Bool(true),
            "FALSE" | "0" => SqlValue::Bool(false),
            _ => SqlValue::text_owned(literal.to_string()),
        },
        _ => {
            if let Ok(v) = literal.parse::<i64>() {
                SqlValue::Int(v)
            } else if let Ok(d) = literal.parse::<Decimal>() {
                match column.logical_type {
                    LogicalType::Float => literal
                        .parse::<f64>()
                        .map_or(SqlValue::Decimal(d), SqlValue::Float),
                    _ => SqlValue::Decimal(d),
                }
            } else if let Ok(v) = literal.parse::<f64>() {
                SqlValue::Float(v)
            } else {
                SqlValue::text_owned(literal.to_string())
            }
        }
    }
}

/// Interpret the content of a quoted literal according to the column type.
fn parse_text(text: String, column: &ColumnTypeInfo) -> SqlValue<'static> {
    match column.logical_type {
        LogicalType::Boolean => as_bool(&SqlValue::from(text.as_str()))
            .map_or_else(|| SqlValue::text_owned(text), SqlValue::Bool),
        LogicalType::Timestamp => timestamp::parse_text(&text)
            .map_or_else(|| SqlValue::text_owned(text), SqlValue::DateTime),
        LogicalType::Json | LogicalType::Array => serde_json::from_str(&text)
            .map_or_else(|_| SqlValue::text_owned(text), SqlValue::Json),
        LogicalType::Integer => text
            .trim()
            .parse::<i64>()
            .map_or_else(|_| SqlValue::text_owned(text), SqlValue::Int),
        _ => SqlValue::Text(Cow::Owned(text)),
    }
}

/// `X'..'` and PostgreSQL `'\x..'::bytea` blob literals.
fn parse_blob(literal: &str) -> Option<Vec<u8>> {
    if let Some(hex_text) = literal
        .strip_prefix("X'")
        .or_else(|| literal.strip_prefix("x'"))
        .and_then(|s| s.strip_suffix('\''))
    {
        return hex::decode(hex_text).ok();
    }
    let hex_text = literal
        .strip_suffix("::bytea")?
        .strip_prefix("'\\x")?
        .strip_suffix('\'')?;
    hex::decode(hex_text).ok()
}

/// Remove a trailing `::type` cast that follows a complete literal.
fn strip_cast(literal: &str) -> &str {
    if literal.starts_with('\'') {
        if let Some(end) = closing_quote(literal) {
            let rest = &literal[end + 1..];
            if rest.starts_with("::") {
                return &literal[..=end];
            }
        }
        return literal;
    }
    match literal.find("::") {
        Some(pos) => &literal[..pos],
        None => literal,
    }
}

/// Byte offset of the quote closing a literal that starts at offset 0.
fn closing_quote(literal: &str) -> Option<usize> {
    let bytes = literal.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
            b'\'' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Content of a single-quoted literal, unescaped for the dialect.
fn unquote_literal(literal: &str, dialect: &dyn Dialect) -> Option<String> {
    let inner = literal.strip_prefix('\'')?.strip_suffix('\'')?;
    let mysql = dialect.kind() == DatabaseKind::Mysql;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if chars.peek() == Some(&'\'') => {
                chars.next();
                out.push('\'');
            }
            '\\' if mysql => match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            },
            _ => out.push(c),
        }
    }
    Some(out)
}

/// Split on commas outside quotes and brackets.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    for c in s.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '[' | '(' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ']' | ')' if !in_quote => {
                depth -= 1;
                current.push(c);
            }
            ',' if !in_quote && depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts.into_iter().map(|p| p.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DialectImpl;
    use chrono::NaiveDate;

    fn col(logical_type: LogicalType) -> ColumnTypeInfo {
        ColumnTypeInfo::new("c", logical_type)
    }

    fn dialect(kind: DatabaseKind) -> DialectImpl {
        DialectImpl::for_kind(kind)
    }

    #[test]
    fn test_null_is_null_for_every_type() {
        for kind in DatabaseKind::ALL {
            let d = dialect(kind);
            for ty in [LogicalType::Boolean, LogicalType::Json, LogicalType::Enum] {
                assert_eq!(to_literal(&SqlValue::Null, Some(&col(ty)), &d), "NULL");
            }
            assert_eq!(to_literal(&SqlValue::Null, None, &d), "NULL");
        }
    }

    #[test]
    fn test_integer_literals_beyond_i64() {
        let int_col = col(LogicalType::Integer);
        let pg = dialect(DatabaseKind::Postgres);

        let big = Decimal::from(u64::MAX);
        assert_eq!(
            to_literal(&SqlValue::Decimal(big), Some(&int_col), &pg),
            "18446744073709551615"
        );
        assert_eq!(
            to_literal(&SqlValue::from("18446744073709551615"), Some(&int_col), &pg),
            "18446744073709551615"
        );
        assert_eq!(
            to_literal(&SqlValue::Float(1e19), Some(&int_col), &pg),
            "10000000000000000000"
        );
        assert_eq!(
            to_literal(&SqlValue::Float(-42.0), Some(&int_col), &pg),
            "-42"
        );
        assert_eq!(
            to_literal(&SqlValue::Int(i64::MIN), Some(&int_col), &pg),
            i64::MIN.to_string()
        );
    }

    #[test]
    fn test_boolean_literals_per_dialect() {
        let bool_col = col(LogicalType::Boolean);
        let pg = dialect(DatabaseKind::Postgres);
        let mysql = dialect(DatabaseKind::Mysql);
        let sqlite = dialect(DatabaseKind::Sqlite);

        assert_eq!(to_literal(&SqlValue::Int(1), Some(&bool_col), &pg), "TRUE");
        assert_eq!(to_literal(&SqlValue::Int(0), Some(&bool_col), &pg), "FALSE");
        assert_eq!(to_literal(&SqlValue::Bool(true), Some(&bool_col), &mysql), "1");
        assert_eq!(to_literal(&SqlValue::from("false"), Some(&bool_col), &sqlite), "0");
    }

    #[test]
    fn test_boolean_round_trip_every_dialect() {
        let bool_col = col(LogicalType::Boolean);
        let inputs = [
            (SqlValue::Int(1), true),
            (SqlValue::Int(0), false),
            (SqlValue::Bool(true), true),
            (SqlValue::Bool(false), false),
            (SqlValue::from("t"), true),
            (SqlValue::from("no"), false),
        ];
        for kind in DatabaseKind::ALL {
            let d = dialect(kind);
            for (input, expected) in &inputs {
                let literal = to_literal(input, Some(&bool_col), &d);
                assert_eq!(literal, to_literal(input, Some(&bool_col), &d));
                assert_eq!(
                    parse_literal(&literal, &bool_col, &d),
                    SqlValue::Bool(*expected),
                    "{} on {}",
                    literal,
                    kind
                );
            }
        }
    }

    #[test]
    fn test_timestamp_literals() {
        let ts_col = col(LogicalType::Timestamp);
        let value = SqlValue::from("2024-03-05T10:20:30.250Z");
        assert_eq!(
            to_literal(&value, Some(&ts_col), &dialect(DatabaseKind::Postgres)),
            "'2024-03-05 10:20:30.250'::timestamp"
        );
        assert_eq!(
            to_literal(&value, Some(&ts_col), &dialect(DatabaseKind::Mysql)),
            "'2024-03-05 10:20:30.250'"
        );
        assert_eq!(
            to_literal(&SqlValue::Int(0), Some(&ts_col), &dialect(DatabaseKind::Sqlite)),
            "'1970-01-01 00:00:00'"
        );
        // unparsable text is kept as-is
        assert_eq!(
            to_literal(&SqlValue::from("soon"), Some(&ts_col), &dialect(DatabaseKind::Sqlite)),
            "'soon'"
        );

        let parsed = parse_literal(
            "'2024-03-05 10:20:30'::timestamp",
            &ts_col,
            &dialect(DatabaseKind::Postgres),
        );
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(10, 20, 30)
            .unwrap();
        assert_eq!(parsed, SqlValue::DateTime(expected));
    }

    #[test]
    fn test_binary_literals() {
        let bin = col(LogicalType::Binary);
        let value = SqlValue::bytes_owned(vec![0xde, 0xad]);
        let pg = dialect(DatabaseKind::Postgres);
        let sqlite = dialect(DatabaseKind::Sqlite);
        assert_eq!(to_literal(&value, Some(&bin), &pg), "'\\xdead'::bytea");
        assert_eq!(to_literal(&value, Some(&bin), &sqlite), "X'DEAD'");
        assert_eq!(parse_literal("'\\xdead'::bytea", &bin, &pg), value);
        assert_eq!(parse_literal("X'DEAD'", &bin, &sqlite), value);
    }

    #[test]
    fn test_json_and_arrays() {
        let json = col(LogicalType::Json);
        let pg = dialect(DatabaseKind::Postgres);
        let mysql = dialect(DatabaseKind::Mysql);

        let doc = SqlValue::from(r#"{ "a": [1, 2] }"#);
        assert_eq!(to_literal(&doc, Some(&json), &pg), r#"'{"a":[1,2]}'::jsonb"#);
        assert_eq!(to_literal(&doc, Some(&json), &mysql), r#"'{"a":[1,2]}'"#);
        assert_eq!(to_literal(&SqlValue::from("plain"), Some(&json), &mysql), r#"'"plain"'"#);

        let mut native = col(LogicalType::Array);
        native.native_array = true;
        let tags = SqlValue::from(r#"["x","y"]"#);
        assert_eq!(to_literal(&tags, Some(&native), &pg), "ARRAY['x', 'y']");
        assert_eq!(to_literal(&tags, Some(&native), &mysql), r#"'["x","y"]'"#);
        assert_eq!(
            to_literal(&SqlValue::Array(vec![]), Some(&native), &pg),
            "'{}'"
        );

        assert_eq!(
            parse_literal("ARRAY['x', 'y']", &native, &pg),
            SqlValue::Array(vec![SqlValue::from("x").into_owned(), SqlValue::from("y").into_owned()])
        );
        assert_eq!(
            parse_literal(r#"'{"a":1}'::jsonb"#, &json, &pg),
            SqlValue::Json(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn test_enum_is_always_quoted() {
        let e = col(LogicalType::Enum);
        let d = dialect(DatabaseKind::Mysql);
        assert_eq!(to_literal(&SqlValue::from("open"), Some(&e), &d), "'open'");
        assert_eq!(to_literal(&SqlValue::Int(3), Some(&e), &d), "'3'");
    }

    #[test]
    fn test_fallback_without_type_info() {
        let d = dialect(DatabaseKind::Sqlite);
        assert_eq!(to_literal(&SqlValue::from("it's"), None, &d), "'it''s'");
        assert_eq!(to_literal(&SqlValue::Int(7), None, &d), "7");
        assert_eq!(to_literal(&SqlValue::Float(2.0), None, &d), "2.0");

        // a mismatched value under a typed column degrades to the generic path
        let int_col = col(LogicalType::Integer);
        assert_eq!(to_literal(&SqlValue::from("n/a"), Some(&int_col), &d), "'n/a'");
    }

    #[test]
    fn test_mysql_string_escapes_round_trip() {
        let text = col(LogicalType::Text);
        let d = dialect(DatabaseKind::Mysql);
        let value = SqlValue::from("C:\\path 'x'");
        let literal = to_literal(&value, Some(&text), &d);
        assert_eq!(parse_literal(&literal, &text, &d), value.into_owned());
    }

    #[test]
    fn test_preserving_literal_keeps_text_spelling() {
        let ts_col = col(LogicalType::Timestamp);
        let d = dialect(DatabaseKind::Sqlite);
        let raw = SqlValue::from("2024-01-01T00:00:00Z");
        assert_eq!(preserving_literal(&raw, Some(&ts_col), &d), "'2024-01-01T00:00:00Z'");
        assert_eq!(
            preserving_literal(&SqlValue::from("yes"), Some(&col(LogicalType::Boolean)), &d),
            "'yes'"
        );
        assert_eq!(
            preserving_literal(&SqlValue::Int(1), Some(&col(LogicalType::Boolean)), &d),
            "1"
        );
    }
}
