//! Database driver implementations.
//!
//! This module provides database-specific implementations of the core traits:
//!
//! - [`sqlite`]: SQLite driver (sqlx)
//! - [`mysql`]: MySQL/MariaDB driver (mysql_async)
//! - [`postgres`]: PostgreSQL driver (tokio-postgres)
//! - [`common`]: Shared utilities (TLS)
//!
//! # Architecture
//!
//! Each driver module implements:
//! - `Dialect`: SQL syntax strategy for the database engine
//! - `Connection`: a single authenticated session
//! - `SchemaReader`: catalog introspection
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `Dialect`, `Connection` and `SchemaReader`
//! 3. Add a variant to [`DatabaseKind`] and [`DialectImpl`], and wire
//!    [`schema_reader`] and [`connect`]

pub mod common;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

// Re-export common utilities
pub use common::{SslMode, TlsBuilder};

// Re-export driver types
pub use mysql::{MysqlCatalog, MysqlConnection, MysqlDialect};
pub use postgres::{PostgresCatalog, PostgresConnection, PostgresDialect};
pub use sqlite::{SqliteCatalog, SqliteConnection, SqliteDialect};

use crate::config::DatabaseConfig;
use crate::core::traits::{Connection, Dialect, SchemaReader, SelectQueryOptions};
use crate::core::{DatabaseKind, DefaultValue};
use crate::error::{PortError, Result};

/// Enum-based static dispatch for dialects.
///
/// Profiles are stateless, so a `DialectImpl` is cheap to copy around and is
/// resolved once from the configured engine.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Sqlite(SqliteDialect),
    Mysql(MysqlDialect),
    Postgres(PostgresDialect),
}

impl DialectImpl {
    /// Profile for an engine.
    pub fn for_kind(kind: DatabaseKind) -> Self {
        match kind {
            DatabaseKind::Sqlite => DialectImpl::Sqlite(SqliteDialect::new()),
            DatabaseKind::Mysql => DialectImpl::Mysql(MysqlDialect::new()),
            DatabaseKind::Postgres => DialectImpl::Postgres(PostgresDialect::new()),
        }
    }

    /// Create a dialect implementation from a database type string.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::UnknownDialect`] if the database type is not recognized.
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        Ok(Self::for_kind(DatabaseKind::parse(db_type)?))
    }

    fn as_dialect(&self) -> &dyn Dialect {
        match self {
            DialectImpl::Sqlite(d) => d,
            DialectImpl::Mysql(d) => d,
            DialectImpl::Postgres(d) => d,
        }
    }
}

impl Dialect for DialectImpl {
    fn name(&self) -> &str {
        self.as_dialect().name()
    }

    fn kind(&self) -> DatabaseKind {
        self.as_dialect().kind()
    }

    fn quote_ident(&self, name: &str) -> String {
        self.as_dialect().quote_ident(name)
    }

    fn quote_reserved_ident(&self, name: &str) -> String {
        self.as_dialect().quote_reserved_ident(name)
    }

    fn quote_string(&self, value: &str) -> String {
        self.as_dialect().quote_string(value)
    }

    fn boolean_literal(&self, value: Option<bool>) -> String {
        self.as_dialect().boolean_literal(value)
    }

    fn timestamp_cast(&self, normalized: &str) -> String {
        self.as_dialect().timestamp_cast(normalized)
    }

    fn blob_literal(&self, bytes: &[u8]) -> String {
        self.as_dialect().blob_literal(bytes)
    }

    fn json_literal(&self, compact: &str) -> String {
        self.as_dialect().json_literal(compact)
    }

    fn array_literal(&self, elements: &[String]) -> Option<String> {
        self.as_dialect().array_literal(elements)
    }

    fn supports_in_place_constraint_alter(&self) -> bool {
        self.as_dialect().supports_in_place_constraint_alter()
    }

    fn max_indexable_key_bytes(&self) -> usize {
        self.as_dialect().max_indexable_key_bytes()
    }

    fn upsert_clause(&self, conflict_columns: &[String], update_columns: &[String]) -> String {
        self.as_dialect()
            .upsert_clause(conflict_columns, update_columns)
    }

    fn foreign_key_checks_sql(&self, enabled: bool) -> String {
        self.as_dialect().foreign_key_checks_sql(enabled)
    }

    fn sequence_reset_sql(&self, table: &str, column: &str, next: i64) -> Option<String> {
        self.as_dialect().sequence_reset_sql(table, column, next)
    }

    fn drop_index_sql(&self, table: &str, index: &str) -> String {
        self.as_dialect().drop_index_sql(table, index)
    }

    fn build_select_query(&self, opts: &SelectQueryOptions) -> String {
        self.as_dialect().build_select_query(opts)
    }
}

/// Catalog reader for an engine.
pub fn schema_reader(kind: DatabaseKind) -> Arc<dyn SchemaReader> {
    match kind {
        DatabaseKind::Sqlite => Arc::new(SqliteCatalog::new()),
        DatabaseKind::Mysql => Arc::new(MysqlCatalog::new()),
        DatabaseKind::Postgres => Arc::new(PostgresCatalog::new()),
    }
}

/// Open a session for the configured database.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Connection>> {
    let conn: Arc<dyn Connection> = match config.kind()? {
        DatabaseKind::Sqlite => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| PortError::Config("database.path is required for sqlite".into()))?;
            Arc::new(SqliteConnection::open(path).await?)
        }
        DatabaseKind::Mysql => Arc::new(MysqlConnection::connect(config).await?),
        DatabaseKind::Postgres => Arc::new(PostgresConnection::connect(config).await?),
    };
    Ok(conn)
}

/// Parse a catalog-reported column default into a [`DefaultValue`].
///
/// Accepts the SQLite and PostgreSQL spellings: quoted literals with an
/// optional `::type` suffix, bare numbers, booleans and `NULL`. Anything else
/// is kept as an expression and emitted verbatim.
pub(crate) fn parse_default(raw: &str) -> DefaultValue {
    let trimmed = raw.trim();

    if trimmed.starts_with('\'') {
        if let Some((text, rest)) = split_quoted(trimmed) {
            if rest.is_empty() || rest.starts_with("::") {
                return DefaultValue::Text(text);
            }
        }
        return DefaultValue::Expression(trimmed.to_string());
    }

    let upper = trimmed.to_uppercase();
    if upper == "NULL" || upper.starts_with("NULL::") {
        return DefaultValue::Null;
    }
    match upper.as_str() {
        "TRUE" => return DefaultValue::Bool(true),
        "FALSE" => return DefaultValue::Bool(false),
        _ => {}
    }

    // PostgreSQL wraps negative numbers in parentheses
    let numeric = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(trimmed);
    if let Ok(v) = numeric.parse::<i64>() {
        return DefaultValue::Int(v);
    }
    if let Ok(v) = numeric.parse::<f64>() {
        if v.is_finite() {
            return DefaultValue::Float(v);
        }
    }

    DefaultValue::Expression(trimmed.to_string())
}

/// Split a leading single-quoted literal into its unescaped text and the remainder.
fn split_quoted(s: &str) -> Option<(String, &str)> {
    let mut text = String::new();
    let mut chars = s.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if matches!(chars.peek(), Some((_, '\''))) {
                text.push('\'');
                chars.next();
            } else {
                return Some((text, &s[i + 1..]));
            }
        } else {
            text.push(c);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_impl_from_db_type() {
        let sqlite = DialectImpl::from_db_type("sqlite3").unwrap();
        assert_eq!(sqlite.name(), "sqlite");

        let mysql = DialectImpl::from_db_type("mariadb").unwrap();
        assert_eq!(mysql.kind(), DatabaseKind::Mysql);

        let postgres = DialectImpl::from_db_type("postgresql").unwrap();
        assert_eq!(postgres.name(), "postgres");

        assert!(matches!(
            DialectImpl::from_db_type("oracle"),
            Err(PortError::UnknownDialect(_))
        ));
    }

    #[test]
    fn test_dialect_impl_dispatch() {
        let mysql = DialectImpl::for_kind(DatabaseKind::Mysql);
        assert_eq!(mysql.quote_ident("table"), "`table`");
        assert_eq!(mysql.quote_string("a\\b"), "'a\\\\b'");
        assert_eq!(mysql.boolean_literal(Some(true)), "1");

        let pg = DialectImpl::for_kind(DatabaseKind::Postgres);
        assert_eq!(pg.quote_ident("table"), "\"table\"");
        assert_eq!(pg.boolean_literal(Some(true)), "TRUE");
        assert_eq!(pg.boolean_literal(None), "NULL");
        assert_eq!(
            pg.array_literal(&["1".into(), "2".into()]).as_deref(),
            Some("ARRAY[1, 2]")
        );

        let sqlite = DialectImpl::for_kind(DatabaseKind::Sqlite);
        assert!(!sqlite.supports_in_place_constraint_alter());
        assert!(sqlite.array_literal(&[]).is_none());
    }

    #[test]
    fn test_every_dialect_quotes_idempotently() {
        for kind in DatabaseKind::ALL {
            let d = DialectImpl::for_kind(kind);
            let once = d.quote_ident("order");
            assert_eq!(d.quote_ident(&once), once, "{}", kind);
        }
    }

    #[test]
    fn test_parse_default() {
        assert_eq!(parse_default("'abc'"), DefaultValue::Text("abc".into()));
        assert_eq!(
            parse_default("'it''s'::character varying"),
            DefaultValue::Text("it's".into())
        );
        assert_eq!(parse_default("NULL"), DefaultValue::Null);
        assert_eq!(parse_default("NULL::text"), DefaultValue::Null);
        assert_eq!(parse_default("true"), DefaultValue::Bool(true));
        assert_eq!(parse_default("42"), DefaultValue::Int(42));
        assert_eq!(parse_default("(-1)"), DefaultValue::Int(-1));
        assert_eq!(parse_default("1.5"), DefaultValue::Float(1.5));
        assert_eq!(
            parse_default("CURRENT_TIMESTAMP"),
            DefaultValue::Expression("CURRENT_TIMESTAMP".into())
        );
        assert_eq!(
            parse_default("(datetime('now'))"),
            DefaultValue::Expression("(datetime('now'))".into())
        );
        assert_eq!(
            parse_default("'a' || 'b'"),
            DefaultValue::Expression("'a' || 'b'".into())
        );
    }
}
