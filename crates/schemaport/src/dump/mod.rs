//! Schema and data dumps.
//!
//! [`DumpEngine`] reads a live database through [`SchemaOperations`] and emits a
//! [`DumpScript`] for any target engine. Statements are emitted in this order:
//!
//! 1. `CREATE TABLE`, referenced tables first
//! 2. chunked `INSERT`s in the same table order
//! 3. `CREATE INDEX`
//! 4. foreign keys that could not be declared inline
//! 5. sequence resynchronization to `max(id) + 1`
//!
//! When the foreign key graph has a cycle the whole script is wrapped in
//! statements that suspend foreign key enforcement for the importing session.

mod order;
mod script;

pub use order::DependencyOrder;
pub use script::{DumpScript, FragmentKind, ImportReport, ScriptFragment};

use tracing::{debug, info, warn};

use crate::config::DumpConfig;
use crate::convert::to_literal;
use crate::core::traits::Dialect;
use crate::core::{ColumnTypeInfo, DatabaseKind, Rows, Table};
use crate::drivers::DialectImpl;
use crate::error::{PortError, Result};
use crate::migration::history::is_bookkeeping_table;
use crate::schema_ops::{ddl, SchemaOperations};

/// What a dump contains.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Emit table and index DDL.
    pub include_ddl: bool,
    /// Emit row data.
    pub include_data: bool,
    /// Rows per INSERT statement.
    pub chunk_size: usize,
    /// Emit upserts keyed on the primary key, for replay into a populated
    /// target. Usually combined with `include_ddl = false`.
    pub upsert: bool,
    /// Tables to dump; empty means every table.
    pub tables: Vec<String>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self::from(&DumpConfig::default())
    }
}

impl From<&DumpConfig> for DumpOptions {
    fn from(config: &DumpConfig) -> Self {
        Self {
            include_ddl: config.include_ddl,
            include_data: config.include_data,
            chunk_size: config.chunk_size,
            upsert: config.upsert,
            tables: Vec::new(),
        }
    }
}

/// Produces dump scripts from a live source database.
pub struct DumpEngine<'a> {
    source: &'a SchemaOperations,
}

impl<'a> DumpEngine<'a> {
    pub fn new(source: &'a SchemaOperations) -> Self {
        Self { source }
    }

    /// Load the definitions of the tables to dump, bookkeeping tables excluded.
    pub async fn load_schema(&self, only: &[String]) -> Result<Vec<Table>> {
        let mut tables = Vec::new();
        for name in self.source.list_tables().await? {
            if is_bookkeeping_table(&name) {
                continue;
            }
            if !only.is_empty() && !only.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
                continue;
            }
            tables.push(self.source.load_table(&name).await?);
        }

        for wanted in only {
            if !tables.iter().any(|t| t.name.eq_ignore_ascii_case(wanted)) {
                return Err(PortError::Config(format!("table {} not found", wanted)));
            }
        }
        Ok(tables)
    }

    /// Generate a script that recreates the source's schema and data on `target`.
    pub async fn generate(&self, target: DatabaseKind, options: &DumpOptions) -> Result<DumpScript> {
        if options.chunk_size == 0 {
            return Err(PortError::Config("chunk_size must be at least 1".into()));
        }

        let order = DependencyOrder::new(self.load_schema(&options.tables).await?);
        let dialect = DialectImpl::for_kind(target);
        let mut script = DumpScript::new(target);

        info!(
            "Dumping {} tables from {} for {}",
            order.tables.len(),
            self.source.dialect().name(),
            target
        );

        if options.include_ddl {
            check_index_limits(&order, target, &dialect)?;
        }

        // SQLite cannot add a foreign key after creation, and accepts forward
        // references anyway.
        let inline_all = target == DatabaseKind::Sqlite;

        // Elsewhere a cycle is broken by adding its constraints after the
        // data; checks only need suspending when that is not possible.
        let suspend_checks = order.has_cycle() && (inline_all || !options.include_ddl);
        if suspend_checks {
            debug!("Foreign key cycle found; suspending checks for the import");
            script.push_ddl(dialect.foreign_key_checks_sql(false));
        }

        if options.include_ddl {
            for table in &order.tables {
                script.push_ddl(ddl::create_table_sql(&dialect, table, |fk| {
                    inline_all || !order.is_deferred(table, fk)
                }));
            }
        }

        let mut resets = Vec::new();
        if options.include_data {
            for table in &order.tables {
                let max_auto = self.dump_rows(table, &dialect, options, &mut script).await?;
                if let (Some(auto), Some(max)) = (table.auto_increment_column(), max_auto) {
                    if let Some(sql) = dialect.sequence_reset_sql(&table.name, &auto.name, max + 1) {
                        resets.push(sql);
                    }
                }
            }
        }

        if options.include_ddl {
            for table in &order.tables {
                for index in &table.indexes {
                    script.push_ddl(ddl::create_index_sql(&dialect, &table.name, index));
                }
            }
            if !inline_all {
                for table in &order.tables {
                    for (i, fk) in table.foreign_keys.iter().enumerate() {
                        if order.is_deferred(table, fk) {
                            script.push_ddl(ddl::add_foreign_key_sql(&dialect, &table.name, fk, i));
                        }
                    }
                }
            }
        }

        for sql in resets {
            script.push_ddl(sql);
        }

        if suspend_checks {
            script.push_ddl(dialect.foreign_key_checks_sql(true));
        }

        info!(
            "Dump ready: {} DDL and {} INSERT statements",
            script.count(FragmentKind::Ddl),
            script.count(FragmentKind::Insert)
        );
        Ok(script)
    }

    /// Append INSERTs for every row of `table`; returns the largest value
    /// of its auto-increment column, if any.
    async fn dump_rows(
        &self,
        table: &Table,
        dialect: &DialectImpl,
        options: &DumpOptions,
        script: &mut DumpScript,
    ) -> Result<Option<i64>> {
        let upsert = if options.upsert && table.has_pk() {
            let updates: Vec<String> = table
                .columns
                .iter()
                .map(|c| c.name.clone())
                .filter(|c| !table.primary_key.iter().any(|k| k.eq_ignore_ascii_case(c)))
                .collect();
            Some(dialect.upsert_clause(&table.primary_key, &updates))
        } else {
            if options.upsert {
                warn!("{} has no primary key; dumping plain INSERTs", table.name);
            }
            None
        };

        let auto = table.auto_increment_column().map(|c| c.name.clone());
        let mut max_auto: Option<i64> = None;
        let mut total = 0usize;

        // Without a key there is no stable order to page by.
        let page = table.has_pk().then_some(options.chunk_size);
        let mut offset = 0usize;
        loop {
            let rows = self
                .source
                .read_rows(&table.name, &table.primary_key, page, page.map(|_| offset))
                .await?;
            if rows.is_empty() {
                break;
            }

            let types = column_types(table, &rows);
            if let Some(idx) = auto.as_deref().and_then(|a| rows.column_index(a)) {
                let page_max = rows.rows.iter().filter_map(|r| r[idx].as_i64()).max();
                max_auto = max_auto.max(page_max);
            }

            for chunk in rows.rows.chunks(options.chunk_size) {
                let literals: Vec<Vec<String>> = chunk
                    .iter()
                    .map(|row| {
                        row.iter()
                            .zip(&types)
                            .map(|(value, ty)| to_literal(value, ty.as_ref(), dialect))
                            .collect()
                    })
                    .collect();
                script.push_insert(ddl::insert_sql(
                    dialect,
                    &table.name,
                    &rows.columns,
                    &literals,
                    upsert.as_deref(),
                ));
            }

            total += rows.len();
            match page {
                Some(size) if rows.len() == size => offset += size,
                _ => break,
            }
        }

        debug!("Dumped {} rows of {}", total, table.name);
        Ok(max_auto)
    }
}

/// Type info for each result column; unknown columns get none and fall back
/// to generic quoting.
fn column_types(table: &Table, rows: &Rows) -> Vec<Option<ColumnTypeInfo>> {
    rows.columns
        .iter()
        .map(|name| table.find_column(name).map(|c| c.type_info()))
        .collect()
}

/// Fail before emitting anything if an index exceeds the target's key limit.
fn check_index_limits(order: &DependencyOrder, target: DatabaseKind, dialect: &DialectImpl) -> Result<()> {
    let limit = dialect.max_indexable_key_bytes();
    for table in &order.tables {
        for index in &table.indexes {
            let bytes = ddl::index_key_bytes(target, &table.columns, index);
            if bytes > limit {
                return Err(PortError::invariant(
                    &table.name,
                    format!(
                        "index {} needs {} key bytes but {} allows {}",
                        index.name, bytes, target, limit
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, ForeignKey, Index, LogicalType};
    use crate::drivers::SqliteConnection;
    use crate::retry::ResilientExecutor;
    use std::sync::Arc;

    async fn source() -> SchemaOperations {
        let conn = SqliteConnection::in_memory().await.unwrap();
        let ops = SchemaOperations::new(Arc::new(conn), ResilientExecutor::default());
        ops.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, is_active BOOLEAN NOT NULL DEFAULT 1)",
        )
        .await
        .unwrap();
        ops.execute(
            "CREATE TABLE tasks (id INTEGER PRIMARY KEY, owner_id INTEGER REFERENCES users(id), title TEXT)",
        )
        .await
        .unwrap();
        ops.execute("CREATE INDEX idx_tasks_owner ON tasks (owner_id)")
            .await
            .unwrap();
        ops.execute("INSERT INTO users (id, name, is_active) VALUES (1, 'ann', 1), (2, 'bob', 0), (3, 'cy', 1)")
            .await
            .unwrap();
        ops.execute("INSERT INTO tasks (id, owner_id, title) VALUES (10, 1, 'it''s due'), (11, 3, NULL)")
            .await
            .unwrap();
        ops
    }

    #[tokio::test]
    async fn test_statement_order_for_postgres() {
        let ops = source().await;
        let script = DumpEngine::new(&ops)
            .generate(DatabaseKind::Postgres, &DumpOptions::default())
            .await
            .unwrap();

        let texts: Vec<&str> = script.fragments.iter().map(|f| f.text.as_str()).collect();
        assert!(texts[0].starts_with("CREATE TABLE \"users\""), "{}", texts[0]);
        assert!(texts[1].starts_with("CREATE TABLE \"tasks\""));
        assert!(texts[1].contains("REFERENCES \"users\""));
        assert!(texts[2].starts_with("INSERT INTO \"users\""));
        assert!(texts[2].contains("(1, 'ann', TRUE)"), "{}", texts[2]);
        assert!(texts[2].contains("(2, 'bob', FALSE)"));
        assert!(texts[3].contains("'it''s due'"));
        assert!(texts[4].starts_with("CREATE INDEX \"idx_tasks_owner\""));
        assert!(texts.iter().any(|t| t.contains("setval") && t.contains("\"users\"") && t.contains(", 4,")));
        assert!(!texts.iter().any(|t| t.contains("session_replication_role")));
    }

    #[tokio::test]
    async fn test_chunking() {
        let ops = source().await;
        let options = DumpOptions {
            include_ddl: false,
            chunk_size: 2,
            tables: vec!["users".into()],
            ..Default::default()
        };
        let script = DumpEngine::new(&ops)
            .generate(DatabaseKind::Mysql, &options)
            .await
            .unwrap();
        assert_eq!(script.count(FragmentKind::Insert), 2);
        assert!(script.fragments[0].text.contains("(1, 'ann', 1)"));
        assert!(script.fragments[1].text.contains("(3, 'cy', 1)"));
        assert!(script.fragments[2].text.contains("AUTO_INCREMENT = 4"));
    }

    #[tokio::test]
    async fn test_upsert_suffix() {
        let ops = source().await;
        let options = DumpOptions {
            include_ddl: false,
            upsert: true,
            tables: vec!["users".into()],
            ..Default::default()
        };
        let script = DumpEngine::new(&ops)
            .generate(DatabaseKind::Postgres, &options)
            .await
            .unwrap();
        assert!(script.fragments[0]
            .text
            .ends_with("ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\", \"is_active\" = EXCLUDED.\"is_active\""));
    }

    #[tokio::test]
    async fn test_unknown_table_and_bookkeeping() {
        let ops = source().await;
        ops.execute("CREATE TABLE _schemaport_markers (name TEXT PRIMARY KEY, value TEXT)")
            .await
            .unwrap();
        let engine = DumpEngine::new(&ops);
        let names: Vec<String> = engine
            .load_schema(&[])
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert!(!names.iter().any(|n| n.starts_with("_schemaport")));

        let err = engine.load_schema(&["missing".to_string()]).await.unwrap_err();
        assert!(matches!(err, PortError::Config(_)));
    }

    #[tokio::test]
    async fn test_cycle_defers_foreign_keys() {
        let conn = SqliteConnection::in_memory().await.unwrap();
        let ops = SchemaOperations::new(Arc::new(conn), ResilientExecutor::default());
        let employees = Table::new("employees")
            .column(Column::new("id", LogicalType::Integer).not_null())
            .column(Column::new("manager_id", LogicalType::Integer))
            .primary_key(["id"])
            .foreign_key(ForeignKey::new(vec!["manager_id"], "employees", vec!["id"]));
        ops.create_table_if_absent(&employees).await.unwrap();
        ops.execute("INSERT INTO employees (id, manager_id) VALUES (1, NULL), (2, 1)")
            .await
            .unwrap();

        let script = DumpEngine::new(&ops)
            .generate(DatabaseKind::Mysql, &DumpOptions::default())
            .await
            .unwrap();
        let texts: Vec<&str> = script.fragments.iter().map(|f| f.text.as_str()).collect();
        assert!(texts[0].starts_with("CREATE TABLE `employees`"));
        assert!(!texts[0].contains("FOREIGN KEY"));
        assert!(texts.iter().any(|t| t.starts_with("ALTER TABLE `employees` ADD CONSTRAINT")));
        assert!(!texts.iter().any(|t| t.contains("FOREIGN_KEY_CHECKS")));

        // Data-only dumps cannot defer, so the checks are suspended instead.
        let data_only = DumpOptions {
            include_ddl: false,
            ..Default::default()
        };
        let rows = DumpEngine::new(&ops)
            .generate(DatabaseKind::Mysql, &data_only)
            .await
            .unwrap();
        assert_eq!(rows.fragments[0].text, "SET FOREIGN_KEY_CHECKS = 0");
        assert_eq!(rows.fragments.last().unwrap().text, "SET FOREIGN_KEY_CHECKS = 1");

        let sqlite = DumpEngine::new(&ops)
            .generate(DatabaseKind::Sqlite, &DumpOptions::default())
            .await
            .unwrap();
        assert_eq!(sqlite.fragments[0].text, "PRAGMA foreign_keys = OFF");
        assert!(sqlite.fragments[1].text.contains("FOREIGN KEY"));
    }

    #[tokio::test]
    async fn test_index_limit_is_checked() {
        let ops = source().await;
        ops.execute("CREATE TABLE docs (id INTEGER PRIMARY KEY, a VARCHAR(2000), b VARCHAR(2000))")
            .await
            .unwrap();
        ops.create_index_if_absent("docs", &Index::new("idx_docs_ab", ["a", "b"]))
            .await
            .unwrap();
        let options = DumpOptions {
            tables: vec!["docs".into()],
            ..Default::default()
        };
        let err = DumpEngine::new(&ops)
            .generate(DatabaseKind::Postgres, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvariantViolation { .. }), "{}", err);
    }
}
