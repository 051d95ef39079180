//! Idempotent schema operations.
//!
//! [`SchemaOperations`] bundles a session, its dialect profile and its catalog
//! reader. Every create primitive checks the live catalog before emitting DDL
//! and every drop primitive swallows "does not exist" errors, so migrations can
//! call them again after a partial failure.
//!
//! All statements go through a [`ResilientConnection`], so transient failures
//! are retried with backoff before anything surfaces to the caller.

pub mod ddl;

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::traits::{Connection, Dialect, SchemaReader, SelectQueryOptions};
use crate::core::{Column, DatabaseKind, Index, Rows, Table};
use crate::drivers::{self, DialectImpl};
use crate::error::{PortError, Result};
use crate::retry::{ResilientConnection, ResilientExecutor};

/// Result of an idempotent DDL primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlOutcome {
    /// The statement ran.
    Applied,
    /// The object already existed; nothing ran.
    AlreadyPresent,
    /// The object did not exist; nothing was dropped.
    AlreadyAbsent,
}

impl DdlOutcome {
    /// True if DDL was executed.
    pub fn is_applied(&self) -> bool {
        matches!(self, DdlOutcome::Applied)
    }
}

/// Idempotent DDL and catalog introspection over one session.
pub struct SchemaOperations {
    conn: ResilientConnection,
    dialect: DialectImpl,
    reader: Arc<dyn SchemaReader>,
}

impl SchemaOperations {
    /// Wrap a session; the dialect and catalog reader follow its engine.
    pub fn new(conn: Arc<dyn Connection>, executor: ResilientExecutor) -> Self {
        let kind = conn.kind();
        Self {
            conn: ResilientConnection::new(conn, executor),
            dialect: DialectImpl::for_kind(kind),
            reader: drivers::schema_reader(kind),
        }
    }

    /// Engine behind the session.
    pub fn kind(&self) -> DatabaseKind {
        self.dialect.kind()
    }

    /// Dialect profile of the session.
    pub fn dialect(&self) -> &DialectImpl {
        &self.dialect
    }

    /// Retrying session handle.
    pub fn connection(&self) -> &ResilientConnection {
        &self.conn
    }

    /// Execute a statement.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        debug!("Executing: {}", sql);
        self.conn.execute(sql).await
    }

    /// Execute a statement without retrying it.
    ///
    /// A transient failure is returned as is; the statement may or may not
    /// have been applied.
    pub async fn execute_once(&self, sql: &str) -> Result<u64> {
        debug!("Executing once: {}", sql);
        self.conn.execute_once(sql).await
    }

    /// Run a query.
    pub async fn query(&self, sql: &str) -> Result<Rows> {
        self.conn.query(sql).await
    }

    // === Introspection ===

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.reader.list_tables(&self.conn).await
    }

    pub async fn has_table(&self, table: &str) -> Result<bool> {
        self.reader.has_table(&self.conn, table).await
    }

    pub async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        self.reader.has_column(&self.conn, table, column).await
    }

    pub async fn has_index(&self, table: &str, index: &str) -> Result<bool> {
        self.reader.has_index(&self.conn, table, index).await
    }

    pub async fn has_view(&self, view: &str) -> Result<bool> {
        self.reader.has_view(&self.conn, view).await
    }

    /// Full metadata for one table.
    pub async fn load_table(&self, table: &str) -> Result<Table> {
        self.reader.load_table(&self.conn, table).await
    }

    /// Column definitions of one table.
    pub async fn load_columns(&self, table: &str) -> Result<Vec<Column>> {
        self.reader.load_columns(&self.conn, table).await
    }

    /// Name of the primary key constraint, for engines that name it.
    pub async fn primary_key_constraint(&self, table: &str) -> Result<Option<String>> {
        self.reader.primary_key_constraint(&self.conn, table).await
    }

    // === Idempotent DDL ===

    /// Create `table` with its primary key, foreign keys and indexes unless it exists.
    ///
    /// Referenced tables must already exist on engines that check foreign keys
    /// at creation time.
    pub async fn create_table_if_absent(&self, table: &Table) -> Result<DdlOutcome> {
        if self.has_table(&table.name).await? {
            debug!("Table {} already exists", table.name);
            return Ok(DdlOutcome::AlreadyPresent);
        }

        let sql = ddl::create_table_sql(&self.dialect, table, |_| true);
        match self.execute(&sql).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => return Ok(DdlOutcome::AlreadyPresent),
            Err(e) => return Err(e),
        }

        for index in &table.indexes {
            self.create_index_if_absent(&table.name, index).await?;
        }

        info!("Created table {}", table.name);
        Ok(DdlOutcome::Applied)
    }

    /// Add `column` to `table` unless it exists.
    ///
    /// On engines that cannot alter constrained tables in place, some columns
    /// can only be introduced by recreating the table first.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::RequiresRecreate`] for such columns; nothing is altered.
    pub async fn add_column_if_absent(&self, table: &str, column: &Column) -> Result<DdlOutcome> {
        if self.has_column(table, &column.name).await? {
            debug!("Column {}.{} already exists", table, column.name);
            return Ok(DdlOutcome::AlreadyPresent);
        }

        if !self.dialect.supports_in_place_constraint_alter() && ddl::sqlite_requires_recreate(column)
        {
            return Err(PortError::RequiresRecreate {
                table: table.to_string(),
                column: column.name.clone(),
            });
        }

        let sql = ddl::add_column_sql(&self.dialect, table, column);
        match self.execute(&sql).await {
            Ok(_) => {
                info!("Added column {}.{}", table, column.name);
                Ok(DdlOutcome::Applied)
            }
            Err(e) if e.is_already_exists() => Ok(DdlOutcome::AlreadyPresent),
            Err(e) => Err(e),
        }
    }

    /// Create `index` on `table` unless an index of that name exists.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvariantViolation`] when the key would exceed the
    /// engine's indexable key size, or when the name is already taken by an
    /// index on another table.
    pub async fn create_index_if_absent(&self, table: &str, index: &Index) -> Result<DdlOutcome> {
        if self.has_index(table, &index.name).await? {
            debug!("Index {} on {} already exists", index.name, table);
            return Ok(DdlOutcome::AlreadyPresent);
        }

        let columns = self.load_columns(table).await?;
        let key_bytes = ddl::index_key_bytes(self.kind(), &columns, index);
        let limit = self.dialect.max_indexable_key_bytes();
        if key_bytes > limit {
            return Err(PortError::invariant(
                table,
                format!(
                    "index {} key of {} bytes exceeds the {} byte limit of {}",
                    index.name,
                    key_bytes,
                    limit,
                    self.dialect.name()
                ),
            ));
        }

        let sql = ddl::create_index_sql(&self.dialect, table, index);
        match self.execute(&sql).await {
            Ok(_) => {
                info!("Created index {} on {}", index.name, table);
                Ok(DdlOutcome::Applied)
            }
            // Index names are schema-wide on PostgreSQL and SQLite.
            Err(e) if e.is_already_exists() => {
                if self.has_index(table, &index.name).await? {
                    Ok(DdlOutcome::AlreadyPresent)
                } else {
                    Err(PortError::invariant(
                        table,
                        format!("index name {} is used by another table", index.name),
                    ))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Drop an index if it exists.
    pub async fn drop_index_if_exists(&self, table: &str, index: &str) -> Result<DdlOutcome> {
        let sql = self.dialect.drop_index_sql(table, index);
        self.drop_object(&sql, "index", index).await
    }

    /// Drop a view if it exists.
    pub async fn drop_view_if_exists(&self, view: &str) -> Result<DdlOutcome> {
        let sql = format!("DROP VIEW {}", self.dialect.quote_ident(view));
        self.drop_object(&sql, "view", view).await
    }

    /// Drop a table if it exists.
    pub async fn drop_table_if_exists(&self, table: &str) -> Result<DdlOutcome> {
        let sql = format!("DROP TABLE {}", self.dialect.quote_ident(table));
        self.drop_object(&sql, "table", table).await
    }

    async fn drop_object(&self, sql: &str, what: &str, name: &str) -> Result<DdlOutcome> {
        match self.execute(sql).await {
            Ok(_) => {
                info!("Dropped {} {}", what, name);
                Ok(DdlOutcome::Applied)
            }
            Err(e) if e.is_missing_object() => {
                debug!("{} {} does not exist", what, name);
                Ok(DdlOutcome::AlreadyAbsent)
            }
            Err(e) => Err(e),
        }
    }

    /// Toggle foreign key enforcement for this session.
    ///
    /// While checks are off the statement is pinned on the session, so a
    /// reconnect during a retry turns them off again.
    pub async fn foreign_key_checks(&self, enabled: bool) -> Result<()> {
        let sql = self.dialect.foreign_key_checks_sql(enabled);
        self.execute(&sql).await?;
        let off = self.dialect.foreign_key_checks_sql(false);
        if enabled {
            self.conn.unpin(&off);
        } else {
            self.conn.pin(off);
        }
        debug!(
            "Foreign key checks {} on {}",
            if enabled { "enabled" } else { "disabled" },
            self.dialect.name()
        );
        Ok(())
    }

    // === Data access ===

    /// Number of rows in `table`.
    pub async fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.dialect.quote_ident(table));
        let rows = self.query(&sql).await?;
        rows.scalar_i64()
            .ok_or_else(|| PortError::database(format!("COUNT(*) on {} returned no value", table)))
    }

    /// Read rows of `table` in `order_by` order.
    pub async fn read_rows(
        &self,
        table: &str,
        order_by: &[String],
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Rows> {
        let sql = self.dialect.build_select_query(&SelectQueryOptions {
            table: table.to_string(),
            order_by: order_by.to_vec(),
            limit,
            offset,
            ..Default::default()
        });
        self.query(&sql).await
    }

    /// Largest value of an integer column, `None` for an empty table.
    pub async fn max_value(&self, table: &str, column: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX({}) FROM {}",
            self.dialect.quote_ident(column),
            self.dialect.quote_ident(table)
        );
        Ok(self.query(&sql).await?.scalar_i64())
    }

    /// Close the underlying session.
    pub async fn close(&self) {
        self.conn.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DefaultValue, ForeignKey, LogicalType};
    use crate::drivers::SqliteConnection;

    async fn ops() -> SchemaOperations {
        let conn = SqliteConnection::in_memory().await.unwrap();
        SchemaOperations::new(Arc::new(conn), ResilientExecutor::default())
    }

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", LogicalType::Integer).not_null().auto_increment())
            .column(Column::new("email", LogicalType::Text).not_null())
            .primary_key(["id"])
            .index(Index::new("users_email_idx", ["email"]).unique())
    }

    #[tokio::test]
    async fn test_create_table_is_idempotent() {
        let ops = ops().await;
        assert_eq!(
            ops.create_table_if_absent(&users()).await.unwrap(),
            DdlOutcome::Applied
        );
        assert_eq!(
            ops.create_table_if_absent(&users()).await.unwrap(),
            DdlOutcome::AlreadyPresent
        );
        assert!(ops.has_index("users", "users_email_idx").await.unwrap());

        let loaded = ops.load_table("users").await.unwrap();
        assert_eq!(loaded.primary_key, vec!["id".to_string()]);
        assert!(loaded.auto_increment_column().is_some());
    }

    #[tokio::test]
    async fn test_index_name_taken_by_another_table() {
        let ops = ops().await;
        ops.create_table_if_absent(&users()).await.unwrap();
        ops.execute("CREATE TABLE teams (id INTEGER PRIMARY KEY, email TEXT)")
            .await
            .unwrap();

        let err = ops
            .create_index_if_absent("teams", &Index::new("users_email_idx", ["email"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvariantViolation { ref table, .. } if table == "teams"));
        assert!(!ops.has_index("teams", "users_email_idx").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_column() {
        let ops = ops().await;
        ops.create_table_if_absent(&users()).await.unwrap();

        let nickname = Column::new("nickname", LogicalType::Text);
        assert!(ops.add_column_if_absent("users", &nickname).await.unwrap().is_applied());
        assert_eq!(
            ops.add_column_if_absent("users", &nickname).await.unwrap(),
            DdlOutcome::AlreadyPresent
        );

        let defaulted = Column::new("plan", LogicalType::Text)
            .not_null()
            .default_value(DefaultValue::Text("free".into()));
        assert!(ops.add_column_if_absent("users", &defaulted).await.unwrap().is_applied());

        let required = Column::new("tenant_id", LogicalType::Text).not_null();
        let err = ops.add_column_if_absent("users", &required).await.unwrap_err();
        assert!(matches!(err, PortError::RequiresRecreate { .. }));
        assert!(!ops.has_column("users", "tenant_id").await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_primitives_swallow_missing_objects() {
        let ops = ops().await;
        assert_eq!(
            ops.drop_table_if_exists("ghost").await.unwrap(),
            DdlOutcome::AlreadyAbsent
        );
        assert_eq!(
            ops.drop_view_if_exists("ghost_view").await.unwrap(),
            DdlOutcome::AlreadyAbsent
        );
        assert_eq!(
            ops.drop_index_if_exists("users", "ghost_idx").await.unwrap(),
            DdlOutcome::AlreadyAbsent
        );

        ops.create_table_if_absent(&users()).await.unwrap();
        ops.execute("CREATE VIEW active_users AS SELECT * FROM users")
            .await
            .unwrap();
        assert!(ops.has_view("active_users").await.unwrap());
        assert!(ops.drop_view_if_exists("active_users").await.unwrap().is_applied());
        assert!(ops
            .drop_index_if_exists("users", "users_email_idx")
            .await
            .unwrap()
            .is_applied());
        assert!(!ops.has_index("users", "users_email_idx").await.unwrap());
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let ops = ops().await;
        ops.create_table_if_absent(&users()).await.unwrap();
        let posts = Table::new("posts")
            .column(Column::new("id", LogicalType::Integer).not_null())
            .column(Column::new("user_id", LogicalType::Integer))
            .primary_key(["id"])
            .foreign_key(ForeignKey::new(["user_id"], "users", ["id"]));
        ops.create_table_if_absent(&posts).await.unwrap();
        ops.execute("INSERT INTO users (id, email) VALUES (1, 'a@example.com')")
            .await
            .unwrap();
        ops.execute("INSERT INTO posts (id, user_id) VALUES (1, 1)")
            .await
            .unwrap();

        // Foreign key enforcement blocks the drop; that is not a missing object.
        let err = ops.drop_table_if_exists("users").await.unwrap_err();
        assert!(!err.is_missing_object());
        assert!(ops.has_table("users").await.unwrap());
    }

    #[tokio::test]
    async fn test_row_count_and_max() {
        let ops = ops().await;
        ops.create_table_if_absent(&users()).await.unwrap();
        assert_eq!(ops.max_value("users", "id").await.unwrap(), None);
        ops.execute("INSERT INTO users (email) VALUES ('a'), ('b')")
            .await
            .unwrap();
        assert_eq!(ops.row_count("users").await.unwrap(), 2);
        assert_eq!(ops.max_value("users", "id").await.unwrap(), Some(2));

        let rows = ops
            .read_rows("users", &["id".to_string()], Some(1), Some(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get_string(0, "email").as_deref(), Some("b"));
    }
}
