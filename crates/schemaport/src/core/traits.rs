//! Core traits for database-agnostic schema and data portability.
//!
//! - [`Connection`]: an already-authenticated session against one engine
//! - [`Dialect`]: static SQL syntax and capability profile for one engine
//! - [`SchemaReader`]: catalog introspection for one engine
//!
//! # Design Patterns
//!
//! - **Strategy**: `Dialect` and `SchemaReader` provide interchangeable per-engine algorithms
//! - **Template Method**: `SchemaReader::load_table` assembles the individual catalog lookups
//! - **Dependency injection**: components receive an `Arc<dyn Connection>`; nothing is global

use async_trait::async_trait;

use crate::error::Result;

use super::catalog::DatabaseKind;
use super::schema::{Column, ForeignKey, Index, Table};
use super::value::Rows;

/// A dialect-tagged database session.
///
/// Each handle owns exactly one session, so session-scoped settings such as
/// foreign key enforcement apply to every statement issued through it.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Engine behind this session.
    fn kind(&self) -> DatabaseKind;

    /// Execute a statement, returning the number of affected rows.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Run a query and collect its rows.
    async fn query(&self, sql: &str) -> Result<Rows>;

    /// Close the session.
    async fn close(&self);
}

/// Options for building a SELECT query.
#[derive(Debug, Clone, Default)]
pub struct SelectQueryOptions {
    /// Table name.
    pub table: String,
    /// Columns to select (empty selects `*`).
    pub columns: Vec<String>,
    /// Ordering columns.
    pub order_by: Vec<String>,
    /// Additional WHERE clause.
    pub where_clause: Option<String>,
    /// Row limit.
    pub limit: Option<usize>,
    /// Rows to skip (only honored together with `limit`).
    pub offset: Option<usize>,
}

/// SQL syntax and capability profile for one engine.
///
/// Profiles are immutable and pure: no method performs I/O. Adding an engine
/// means adding one implementation of this trait, not auditing call sites.
///
/// Invariants every implementation upholds:
/// - `boolean_literal` output is accepted by the engine and read back as the same boolean
/// - `quote_ident` is idempotent
/// - `max_indexable_key_bytes` is a bound the engine actually enforces at DDL time
pub trait Dialect: Send + Sync {
    /// Dialect identifier (e.g. "sqlite", "postgres").
    fn name(&self) -> &str;

    /// Engine this profile describes.
    fn kind(&self) -> DatabaseKind;

    /// Quote an identifier unconditionally (idempotent).
    fn quote_ident(&self, name: &str) -> String;

    /// Quote an identifier only when it is reserved or not a plain lowercase name.
    fn quote_reserved_ident(&self, name: &str) -> String {
        if crate::core::identifier::needs_quoting(name) {
            self.quote_ident(name)
        } else {
            name.to_string()
        }
    }

    /// Quote a string literal.
    fn quote_string(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Boolean literal, `NULL` for `None`.
    fn boolean_literal(&self, value: Option<bool>) -> String;

    /// Literal for an already normalized `YYYY-MM-DD HH:MM:SS[.fff]` timestamp.
    fn timestamp_cast(&self, normalized: &str) -> String;

    /// Literal for binary data.
    fn blob_literal(&self, bytes: &[u8]) -> String;

    /// Literal for compact JSON text.
    fn json_literal(&self, compact: &str) -> String {
        self.quote_string(compact)
    }

    /// Native array literal from already rendered element literals.
    ///
    /// `None` when the engine has no native array type.
    fn array_literal(&self, _elements: &[String]) -> Option<String> {
        None
    }

    /// Whether constraints (primary keys, NOT NULL columns) can be altered in place.
    fn supports_in_place_constraint_alter(&self) -> bool;

    /// Largest index key the engine accepts, in bytes.
    fn max_indexable_key_bytes(&self) -> usize;

    /// Clause appended to an INSERT to turn it into an upsert.
    fn upsert_clause(&self, conflict_columns: &[String], update_columns: &[String]) -> String;

    /// Statement toggling foreign key enforcement for the session.
    fn foreign_key_checks_sql(&self, enabled: bool) -> String;

    /// Statement moving an auto-increment counter so the next generated value is `next`.
    ///
    /// `None` for engines whose counter follows explicit inserts.
    fn sequence_reset_sql(&self, table: &str, column: &str, next: i64) -> Option<String>;

    /// Statement dropping an index.
    fn drop_index_sql(&self, table: &str, index: &str) -> String;

    /// Build a SELECT query.
    fn build_select_query(&self, opts: &SelectQueryOptions) -> String {
        let cols = if opts.columns.is_empty() {
            "*".to_string()
        } else {
            opts.columns
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", cols, self.quote_ident(&opts.table));

        if let Some(ref where_clause) = opts.where_clause {
            if !where_clause.is_empty() {
                sql.push_str(&format!(" WHERE ({})", where_clause));
            }
        }

        if !opts.order_by.is_empty() {
            let order = opts
                .order_by
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {}", order));
        }

        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
            if let Some(offset) = opts.offset {
                sql.push_str(&format!(" OFFSET {}", offset));
            }
        }

        sql
    }
}

/// Catalog introspection for one engine.
///
/// Every method is a live query; nothing is cached, so idempotency checks built
/// on top of it tolerate manually repaired databases.
#[async_trait]
pub trait SchemaReader: Send + Sync {
    /// User tables, sorted by name.
    async fn list_tables(&self, conn: &dyn Connection) -> Result<Vec<String>>;

    /// Column definitions in ordinal order.
    async fn load_columns(&self, conn: &dyn Connection, table: &str) -> Result<Vec<Column>>;

    /// Primary key columns in key order.
    async fn load_primary_key(&self, conn: &dyn Connection, table: &str) -> Result<Vec<String>>;

    /// Secondary indexes (the primary key index excluded).
    async fn load_indexes(&self, conn: &dyn Connection, table: &str) -> Result<Vec<Index>>;

    /// Foreign keys declared on the table.
    async fn load_foreign_keys(&self, conn: &dyn Connection, table: &str)
        -> Result<Vec<ForeignKey>>;

    /// Check if a table exists.
    async fn has_table(&self, conn: &dyn Connection, table: &str) -> Result<bool>;

    /// Check if a view exists.
    async fn has_view(&self, conn: &dyn Connection, view: &str) -> Result<bool>;

    /// Check if an index exists on a table.
    async fn has_index(&self, conn: &dyn Connection, table: &str, index: &str) -> Result<bool>;

    /// Name of the primary key constraint, for engines that name it.
    async fn primary_key_constraint(
        &self,
        _conn: &dyn Connection,
        _table: &str,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    /// Check if a column exists on a table.
    async fn has_column(&self, conn: &dyn Connection, table: &str, column: &str) -> Result<bool> {
        if !self.has_table(conn, table).await? {
            return Ok(false);
        }
        let columns = self.load_columns(conn, table).await?;
        Ok(columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
    }

    /// Load full table metadata.
    async fn load_table(&self, conn: &dyn Connection, name: &str) -> Result<Table> {
        let mut table = Table::new(name);
        table.columns = self.load_columns(conn, name).await?;
        table.primary_key = self.load_primary_key(conn, name).await?;
        table.indexes = self.load_indexes(conn, name).await?;
        table.foreign_keys = self.load_foreign_keys(conn, name).await?;
        Ok(table)
    }
}
