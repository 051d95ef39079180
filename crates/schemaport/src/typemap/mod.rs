//! Type mapping between declared engine types and logical types.
//!
//! Inference reads a declared type string from any supported engine; rendering
//! turns a [`Column`] back into a declared type for a target engine.

use crate::core::{Column, DatabaseKind, LogicalType};

/// VARCHAR width used for keyed text columns without a declared length.
pub const DEFAULT_KEY_TEXT_LENGTH: u32 = 255;

/// Bytes per character assumed for text keys (utf8mb4 worst case).
const BYTES_PER_CHAR: usize = 4;

/// Infer the logical type of a declared column type.
///
/// Returns the logical type and whether the column is a native array.
pub fn infer_logical_type(declared: &str) -> (LogicalType, bool) {
    let lower = declared.trim().to_lowercase();

    // PostgreSQL arrays: "integer[]", "_int4", "ARRAY"
    if lower.ends_with("[]") || lower == "array" || lower.starts_with('_') {
        return (LogicalType::Array, true);
    }

    // MySQL booleans are declared tinyint(1)
    if lower.starts_with("bool") || lower == "tinyint(1)" || lower == "bit(1)" {
        return (LogicalType::Boolean, false);
    }

    if lower.starts_with("enum(") || lower.starts_with("enum ") {
        return (LogicalType::Enum, false);
    }

    let base = lower
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default();

    let logical = match base {
        "int" | "integer" | "int2" | "int4" | "int8" | "tinyint" | "smallint" | "mediumint"
        | "bigint" | "serial" | "bigserial" | "smallserial" | "year" => LogicalType::Integer,

        "real" | "float" | "float4" | "float8" | "double" | "numeric" | "decimal" | "dec"
        | "money" => LogicalType::Float,

        "timestamp" | "timestamptz" | "datetime" => LogicalType::Timestamp,

        "blob" | "tinyblob" | "mediumblob" | "longblob" | "bytea" | "binary" | "varbinary" => {
            LogicalType::Binary
        }

        "json" | "jsonb" => LogicalType::Json,

        _ => LogicalType::Text,
    };

    (logical, false)
}

/// Parse the variants of a MySQL `enum('a','b')` declaration.
pub fn parse_enum_values(declared: &str) -> Vec<String> {
    let trimmed = declared.trim();
    let Some(open) = trimmed.find('(') else {
        return Vec::new();
    };
    let Some(close) = trimmed.rfind(')') else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    let inner = &trimmed[open + 1..close];

    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, in_quote) {
            ('\'', false) => in_quote = true,
            ('\'', true) if chars.peek() == Some(&'\'') => {
                current.push('\'');
                chars.next();
            }
            ('\'', true) => {
                in_quote = false;
                values.push(std::mem::take(&mut current));
            }
            (_, true) => current.push(c),
            _ => {}
        }
    }
    values
}

/// Length from a declared type such as `VARCHAR(100)`.
pub fn declared_length(declared: &str) -> Option<u32> {
    let open = declared.find('(')?;
    let close = declared[open..].find(')')? + open;
    let inner = &declared[open + 1..close];
    if inner.contains(',') {
        return None;
    }
    inner.trim().parse().ok()
}

/// Render a column's declared type for `target`.
///
/// `keyed` is true when the column takes part in a primary key, index or
/// foreign key; MySQL cannot index unbounded TEXT, so keyed text becomes VARCHAR.
pub fn render_type(target: DatabaseKind, column: &Column, keyed: bool) -> String {
    match (column.logical_type, target) {
        (LogicalType::Boolean, DatabaseKind::Sqlite) => "INTEGER".into(),
        (LogicalType::Boolean, DatabaseKind::Mysql) => "TINYINT(1)".into(),
        (LogicalType::Boolean, DatabaseKind::Postgres) => "BOOLEAN".into(),

        (LogicalType::Integer, DatabaseKind::Sqlite) => "INTEGER".into(),
        (LogicalType::Integer, _) => "BIGINT".into(),

        (LogicalType::Float, DatabaseKind::Sqlite) => "REAL".into(),
        (LogicalType::Float, DatabaseKind::Mysql) => "DOUBLE".into(),
        (LogicalType::Float, DatabaseKind::Postgres) => "DOUBLE PRECISION".into(),

        (LogicalType::Text, DatabaseKind::Sqlite) => "TEXT".into(),
        (LogicalType::Text, _) => match column.max_length {
            Some(len) => format!("VARCHAR({})", len),
            None if keyed && target == DatabaseKind::Mysql => {
                format!("VARCHAR({})", DEFAULT_KEY_TEXT_LENGTH)
            }
            None => "TEXT".into(),
        },

        (LogicalType::Timestamp, DatabaseKind::Sqlite) => "DATETIME".into(),
        (LogicalType::Timestamp, DatabaseKind::Mysql) => "DATETIME(6)".into(),
        (LogicalType::Timestamp, DatabaseKind::Postgres) => "TIMESTAMP".into(),

        (LogicalType::Binary, DatabaseKind::Sqlite) => "BLOB".into(),
        (LogicalType::Binary, DatabaseKind::Mysql) => match column.max_length {
            Some(len) => format!("VARBINARY({})", len),
            None if keyed => format!("VARBINARY({})", DEFAULT_KEY_TEXT_LENGTH),
            None => "LONGBLOB".into(),
        },
        (LogicalType::Binary, DatabaseKind::Postgres) => "BYTEA".into(),

        (LogicalType::Json, DatabaseKind::Sqlite) => "TEXT".into(),
        (LogicalType::Json, DatabaseKind::Mysql) => "JSON".into(),
        (LogicalType::Json, DatabaseKind::Postgres) => "JSONB".into(),

        (LogicalType::Array, DatabaseKind::Postgres) if column.native_array => {
            let declared = column.declared_type.trim();
            if declared.ends_with("[]") {
                declared.to_uppercase()
            } else if let Some(element) = declared.strip_prefix('_') {
                format!("{}[]", element.to_uppercase())
            } else {
                "TEXT[]".into()
            }
        }
        (LogicalType::Array, DatabaseKind::Sqlite) => "TEXT".into(),
        (LogicalType::Array, DatabaseKind::Mysql) => "JSON".into(),
        (LogicalType::Array, DatabaseKind::Postgres) => "JSONB".into(),

        (LogicalType::Enum, DatabaseKind::Mysql) if !column.enum_values.is_empty() => {
            let variants = column
                .enum_values
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "''")))
                .collect::<Vec<_>>()
                .join(",");
            format!("ENUM({})", variants)
        }
        (LogicalType::Enum, DatabaseKind::Sqlite) => "TEXT".into(),
        (LogicalType::Enum, _) => {
            let widest = column
                .enum_values
                .iter()
                .map(|v| v.chars().count())
                .max()
                .unwrap_or(0);
            format!("VARCHAR({})", widest.max(32))
        }
    }
}

/// Estimated key bytes contributed by a column in an index on `target`.
pub fn key_bytes(target: DatabaseKind, column: &Column) -> usize {
    match column.logical_type {
        LogicalType::Boolean => 1,
        LogicalType::Integer | LogicalType::Float | LogicalType::Timestamp => 8,
        LogicalType::Enum if target == DatabaseKind::Mysql => 2,
        LogicalType::Text | LogicalType::Enum | LogicalType::Binary => {
            let chars = column.max_length.unwrap_or(DEFAULT_KEY_TEXT_LENGTH) as usize;
            if column.logical_type == LogicalType::Binary {
                chars
            } else {
                chars * BYTES_PER_CHAR
            }
        }
        // Structured values are never valid B-tree keys; make them exceed any bound.
        LogicalType::Json | LogicalType::Array => usize::MAX / 4,
    }
}
