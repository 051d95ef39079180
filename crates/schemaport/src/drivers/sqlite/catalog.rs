//! SQLite catalog introspection via `sqlite_master` and the pragma table functions.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::core::traits::{Connection, Dialect, SchemaReader};
use crate::core::{Column, ForeignKey, Index, IndexColumn, LogicalType};
use crate::drivers::parse_default;
use crate::error::Result;
use crate::typemap::{declared_length, infer_logical_type};

use super::SqliteDialect;

/// SQLite schema reader.
#[derive(Debug, Clone, Default)]
pub struct SqliteCatalog {
    dialect: SqliteDialect,
}

impl SqliteCatalog {
    /// Create a new SQLite catalog reader.
    pub fn new() -> Self {
        Self::default()
    }

    fn lit(&self, value: &str) -> String {
        self.dialect.quote_string(value)
    }

    async fn master_exists(&self, conn: &dyn Connection, kind: &str, name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = {} AND lower(name) = lower({})",
            self.lit(kind),
            self.lit(name)
        );
        Ok(conn.query(&sql).await?.scalar_i64().unwrap_or(0) > 0)
    }
}

#[async_trait]
impl SchemaReader for SqliteCatalog {
    async fn list_tables(&self, conn: &dyn Connection) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .await?;
        Ok((0..rows.len())
            .filter_map(|i| rows.get_string(i, "name"))
            .collect())
    }

    async fn load_columns(&self, conn: &dyn Connection, table: &str) -> Result<Vec<Column>> {
        let sql = format!(
            "SELECT name, type, \"notnull\" AS not_null, dflt_value, pk \
             FROM pragma_table_info({}) ORDER BY cid",
            self.lit(table)
        );
        let rows = conn.query(&sql).await?;

        let pk_count = (0..rows.len())
            .filter(|&i| rows.get_i64(i, "pk").unwrap_or(0) > 0)
            .count();

        let mut columns = Vec::with_capacity(rows.len());
        for i in 0..rows.len() {
            let name = rows.get_string(i, "name").unwrap_or_default();
            let declared = rows.get_string(i, "type").unwrap_or_default();
            let (logical, native_array) = infer_logical_type(&declared);
            let is_pk = rows.get_i64(i, "pk").unwrap_or(0) > 0;

            let mut column = Column::new(name, logical);
            column.is_nullable = rows.get_i64(i, "not_null").unwrap_or(0) == 0 && !is_pk;
            column.native_array = native_array;
            column.max_length = declared_length(&declared);
            // A lone INTEGER PRIMARY KEY aliases the rowid and auto-increments.
            column.auto_increment =
                is_pk && pk_count == 1 && declared.eq_ignore_ascii_case("integer");
            column.default = rows.get_string(i, "dflt_value").map(|d| parse_default(&d));
            if column.logical_type == LogicalType::Boolean {
                column.max_length = None;
            }
            column.declared_type = declared;
            columns.push(column);
        }
        Ok(columns)
    }

    async fn load_primary_key(&self, conn: &dyn Connection, table: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT name FROM pragma_table_info({}) WHERE pk > 0 ORDER BY pk",
            self.lit(table)
        );
        let rows = conn.query(&sql).await?;
        Ok((0..rows.len())
            .filter_map(|i| rows.get_string(i, "name"))
            .collect())
    }

    async fn load_indexes(&self, conn: &dyn Connection, table: &str) -> Result<Vec<Index>> {
        let sql = format!(
            "SELECT name, \"unique\" AS is_unique, origin FROM pragma_index_list({}) \
             WHERE origin <> 'pk' ORDER BY name",
            self.lit(table)
        );
        let list = conn.query(&sql).await?;

        let mut indexes = Vec::with_capacity(list.len());
        for i in 0..list.len() {
            let Some(name) = list.get_string(i, "name") else {
                continue;
            };
            let is_unique = list.get_i64(i, "is_unique").unwrap_or(0) == 1;

            let cols_sql = format!(
                "SELECT name, \"desc\" AS is_desc FROM pragma_index_xinfo({}) \
                 WHERE key = 1 ORDER BY seqno",
                self.lit(&name)
            );
            let cols = conn.query(&cols_sql).await?;
            let columns: Vec<IndexColumn> = (0..cols.len())
                .filter_map(|j| {
                    cols.get_string(j, "name").map(|n| IndexColumn {
                        name: n,
                        desc: cols.get_i64(j, "is_desc").unwrap_or(0) == 1,
                    })
                })
                .collect();
            if columns.is_empty() {
                // expression index
                continue;
            }

            // Constraint-backed indexes carry reserved names that cannot be recreated.
            let name = if name.starts_with("sqlite_autoindex_") {
                let parts: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                format!("{}_{}_key", table, parts.join("_"))
            } else {
                name
            };

            indexes.push(Index {
                name,
                columns,
                is_unique,
            });
        }
        Ok(indexes)
    }

    async fn load_foreign_keys(
        &self,
        conn: &dyn Connection,
        table: &str,
    ) -> Result<Vec<ForeignKey>> {
        let sql = format!(
            "SELECT id, \"table\" AS ref_table, \"from\" AS from_col, \"to\" AS to_col, \
             on_update, on_delete FROM pragma_foreign_key_list({}) ORDER BY id, seq",
            self.lit(table)
        );
        let rows = conn.query(&sql).await?;

        let mut grouped: BTreeMap<i64, ForeignKey> = BTreeMap::new();
        for i in 0..rows.len() {
            let id = rows.get_i64(i, "id").unwrap_or(0);
            let ref_table = rows.get_string(i, "ref_table").unwrap_or_default();
            let fk = grouped.entry(id).or_insert_with(|| ForeignKey {
                name: format!("fk_{}_{}", table, id),
                columns: Vec::new(),
                ref_table: ref_table.clone(),
                ref_columns: Vec::new(),
                on_delete: rows.get_string(i, "on_delete").unwrap_or_default(),
                on_update: rows.get_string(i, "on_update").unwrap_or_default(),
            });
            fk.columns
                .push(rows.get_string(i, "from_col").unwrap_or_default());
            if let Some(to) = rows.get_string(i, "to_col") {
                fk.ref_columns.push(to);
            }
        }

        let mut fks: Vec<ForeignKey> = grouped.into_values().collect();
        for fk in &mut fks {
            // REFERENCES parent without a column list targets the parent's primary key.
            if fk.ref_columns.is_empty() {
                fk.ref_columns = self.load_primary_key(conn, &fk.ref_table).await?;
            }
        }
        Ok(fks)
    }

    async fn has_table(&self, conn: &dyn Connection, table: &str) -> Result<bool> {
        self.master_exists(conn, "table", table).await
    }

    async fn has_view(&self, conn: &dyn Connection, view: &str) -> Result<bool> {
        self.master_exists(conn, "view", view).await
    }

    async fn has_index(&self, conn: &dyn Connection, table: &str, index: &str) -> Result<bool> {
        // Names are unique per database; the owning table must match too.
        let sql = format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' \
             AND lower(name) = lower({}) AND lower(tbl_name) = lower({})",
            self.lit(index),
            self.lit(table)
        );
        Ok(conn.query(&sql).await?.scalar_i64().unwrap_or(0) > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sqlite::SqliteConnection;

    #[tokio::test]
    async fn test_load_table_reads_constraints() {
        let conn = SqliteConnection::in_memory().await.unwrap();
        conn.execute(
            "CREATE TABLE parents (id INTEGER PRIMARY KEY, code VARCHAR(20) NOT NULL UNIQUE);
             CREATE TABLE children (
                 id INTEGER PRIMARY KEY,
                 parent_id INTEGER REFERENCES parents ON DELETE CASCADE,
                 active BOOLEAN NOT NULL DEFAULT 1,
                 note TEXT DEFAULT 'n/a'
             );
             CREATE INDEX idx_children_parent ON children (parent_id DESC);",
        )
        .await
        .unwrap();

        let catalog = SqliteCatalog::new();
        assert_eq!(
            catalog.list_tables(&conn).await.unwrap(),
            vec!["children", "parents"]
        );

        let table = catalog.load_table(&conn, "children").await.unwrap();
        assert_eq!(table.primary_key, vec!["id"]);
        assert!(table.columns[0].auto_increment);
        assert!(!table.columns[0].is_nullable);

        let active = table.find_column("active").unwrap();
        assert_eq!(active.logical_type, LogicalType::Boolean);
        assert!(!active.is_nullable);

        let note = table.find_column("note").unwrap();
        assert_eq!(
            note.default,
            Some(crate::core::DefaultValue::Text("n/a".into()))
        );

        assert_eq!(table.indexes.len(), 1);
        assert!(table.indexes[0].columns[0].desc);

        assert_eq!(table.foreign_keys.len(), 1);
        let fk = &table.foreign_keys[0];
        assert_eq!(fk.ref_table, "parents");
        assert_eq!(fk.ref_columns, vec!["id"]);
        assert_eq!(fk.on_delete, "CASCADE");

        let parents = catalog.load_table(&conn, "parents").await.unwrap();
        assert_eq!(parents.indexes[0].name, "parents_code_key");
        assert!(parents.indexes[0].is_unique);
        assert_eq!(parents.find_column("code").unwrap().max_length, Some(20));

        assert!(catalog.has_index(&conn, "children", "idx_children_parent").await.unwrap());
        assert!(!catalog.has_index(&conn, "parents", "idx_children_parent").await.unwrap());
        assert!(!catalog.has_view(&conn, "children").await.unwrap());
        assert!(catalog.has_column(&conn, "children", "NOTE").await.unwrap());
    }
}
