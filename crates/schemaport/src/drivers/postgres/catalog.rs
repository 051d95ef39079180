//! PostgreSQL catalog introspection.
//!
//! Columns come from `information_schema`; keys and indexes from `pg_catalog`,
//! which keeps per-column ordering and DESC flags. Lookups are scoped to
//! `current_schema()`. Every text column is cast to `text` because the
//! information_schema domains (`sql_identifier`, `cardinal_number`) have no
//! client-side decoder.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use crate::core::traits::{Connection, Dialect, SchemaReader};
use crate::core::{Column, ForeignKey, Index, IndexColumn, LogicalType};
use crate::drivers::parse_default;
use crate::error::Result;
use crate::typemap::infer_logical_type;

use super::PostgresDialect;

/// PostgreSQL schema reader.
#[derive(Debug, Clone, Default)]
pub struct PostgresCatalog {
    dialect: PostgresDialect,
}

impl PostgresCatalog {
    /// Create a new PostgreSQL catalog reader.
    pub fn new() -> Self {
        Self::default()
    }

    fn lit(&self, value: &str) -> String {
        self.dialect.quote_string(value)
    }

    /// `to_regclass(...)` expression resolving `table` exactly as named.
    fn regclass(&self, table: &str) -> String {
        format!("to_regclass({})", self.lit(&self.dialect.quote_ident(table)))
    }

    async fn count(&self, conn: &dyn Connection, sql: &str) -> Result<bool> {
        Ok(conn.query(sql).await?.scalar_i64().unwrap_or(0) > 0)
    }

    async fn relation_of_type(
        &self,
        conn: &dyn Connection,
        name: &str,
        kind: &str,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = {} AND table_type = {}",
            self.lit(name),
            self.lit(kind)
        );
        self.count(conn, &sql).await
    }

    async fn enum_labels(&self, conn: &dyn Connection, type_name: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT e.enumlabel::text AS label \
             FROM pg_catalog.pg_type t \
             JOIN pg_catalog.pg_enum e ON e.enumtypid = t.oid \
             WHERE t.typname = {} \
             ORDER BY e.enumsortorder",
            self.lit(type_name)
        );
        let rows = conn.query(&sql).await?;
        Ok((0..rows.len())
            .filter_map(|i| rows.get_string(i, "label"))
            .collect())
    }
}

/// Render the `confdeltype` / `confupdtype` code as an action keyword.
const ACTION_CASE: &str = "WHEN 'r' THEN 'RESTRICT' WHEN 'c' THEN 'CASCADE' \
     WHEN 'n' THEN 'SET NULL' WHEN 'd' THEN 'SET DEFAULT' ELSE 'NO ACTION'";

#[async_trait]
impl SchemaReader for PostgresCatalog {
    async fn list_tables(&self, conn: &dyn Connection) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "SELECT table_name::text AS table_name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
            )
            .await?;
        Ok((0..rows.len())
            .filter_map(|i| rows.get_string(i, "table_name"))
            .collect())
    }

    async fn load_columns(&self, conn: &dyn Connection, table: &str) -> Result<Vec<Column>> {
        let sql = format!(
            "SELECT \
                column_name::text AS column_name, \
                data_type::text AS data_type, \
                udt_name::text AS udt_name, \
                character_maximum_length::int4 AS max_length, \
                CASE WHEN is_nullable = 'YES' THEN 1 ELSE 0 END AS is_nullable, \
                column_default::text AS column_default, \
                CASE WHEN is_identity = 'YES' OR column_default LIKE 'nextval(%' \
                     THEN 1 ELSE 0 END AS is_auto \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = {} \
             ORDER BY ordinal_position",
            self.lit(table)
        );
        let rows = conn.query(&sql).await?;

        let mut columns = Vec::with_capacity(rows.len());
        for i in 0..rows.len() {
            let name = rows.get_string(i, "column_name").unwrap_or_default();
            let data_type = rows.get_string(i, "data_type").unwrap_or_default();
            let udt_name = rows.get_string(i, "udt_name").unwrap_or_default();
            let max_length = rows
                .get_i64(i, "max_length")
                .and_then(|v| u32::try_from(v).ok());

            let declared = match data_type.as_str() {
                "ARRAY" | "USER-DEFINED" => udt_name.clone(),
                _ => match max_length {
                    Some(len) => format!("{}({})", data_type, len),
                    None => data_type.clone(),
                },
            };
            let (mut logical, native_array) = infer_logical_type(&declared);

            let enum_values = if data_type == "USER-DEFINED" {
                self.enum_labels(conn, &udt_name).await?
            } else {
                Vec::new()
            };
            if !enum_values.is_empty() {
                logical = LogicalType::Enum;
            }

            let auto_increment = rows.get_i64(i, "is_auto").unwrap_or(0) == 1;
            let mut column = Column::new(name, logical);
            column.is_nullable = rows.get_i64(i, "is_nullable").unwrap_or(1) == 1;
            column.native_array = native_array;
            column.auto_increment = auto_increment;
            column.enum_values = enum_values;
            column.max_length = match logical {
                LogicalType::Text | LogicalType::Binary => max_length,
                _ => None,
            };
            // Sequence defaults belong to the serial column itself.
            if !auto_increment {
                column.default = rows
                    .get_string(i, "column_default")
                    .map(|d| parse_default(&d));
            }
            column.declared_type = declared;
            columns.push(column);
        }
        Ok(columns)
    }

    async fn load_primary_key(&self, conn: &dyn Connection, table: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT a.attname::text AS column_name \
             FROM pg_catalog.pg_index i \
             JOIN pg_catalog.pg_attribute a \
                ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             WHERE i.indrelid = {} AND i.indisprimary \
             ORDER BY array_position(i.indkey::int2[], a.attnum)",
            self.regclass(table)
        );
        let rows = conn.query(&sql).await?;
        Ok((0..rows.len())
            .filter_map(|i| rows.get_string(i, "column_name"))
            .collect())
    }

    async fn load_indexes(&self, conn: &dyn Connection, table: &str) -> Result<Vec<Index>> {
        let sql = format!(
            "SELECT \
                ic.relname::text AS index_name, \
                CASE WHEN i.indisunique THEN 1 ELSE 0 END AS is_unique, \
                a.attname::text AS column_name, \
                CASE WHEN (i.indoption[k.ord - 1]::int & 1) = 1 THEN 1 ELSE 0 END AS is_desc \
             FROM pg_catalog.pg_index i \
             JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid \
             CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) \
             LEFT JOIN pg_catalog.pg_attribute a \
                ON a.attrelid = i.indrelid AND a.attnum = k.attnum \
             WHERE i.indrelid = {} AND NOT i.indisprimary AND k.ord <= i.indnkeyatts \
             ORDER BY ic.relname, k.ord",
            self.regclass(table)
        );
        let rows = conn.query(&sql).await?;

        let mut grouped: BTreeMap<String, Option<Index>> = BTreeMap::new();
        for i in 0..rows.len() {
            let Some(name) = rows.get_string(i, "index_name") else {
                continue;
            };
            let entry = grouped.entry(name.clone()).or_insert_with(|| {
                Some(Index {
                    name,
                    columns: Vec::new(),
                    is_unique: rows.get_i64(i, "is_unique").unwrap_or(0) == 1,
                })
            });
            match (entry.as_mut(), rows.get_string(i, "column_name")) {
                (Some(index), Some(column)) => index.columns.push(IndexColumn {
                    name: column,
                    desc: rows.get_i64(i, "is_desc").unwrap_or(0) == 1,
                }),
                // expression key; not reproducible from column metadata
                _ => *entry = None,
            }
        }

        let indexes: Vec<Index> = grouped.into_values().flatten().collect();
        debug!("Loaded {} indexes for {}", indexes.len(), table);
        Ok(indexes)
    }

    async fn load_foreign_keys(
        &self,
        conn: &dyn Connection,
        table: &str,
    ) -> Result<Vec<ForeignKey>> {
        let sql = format!(
            "SELECT \
                c.conname::text AS constraint_name, \
                a.attname::text AS column_name, \
                rt.relname::text AS ref_table, \
                ra.attname::text AS ref_column, \
                (CASE c.confdeltype {actions} END)::text AS on_delete, \
                (CASE c.confupdtype {actions} END)::text AS on_update \
             FROM pg_catalog.pg_constraint c \
             JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid \
             CROSS JOIN LATERAL unnest(c.conkey, c.confkey) \
                WITH ORDINALITY AS k(attnum, ref_attnum, ord) \
             JOIN pg_catalog.pg_attribute a \
                ON a.attrelid = c.conrelid AND a.attnum = k.attnum \
             JOIN pg_catalog.pg_attribute ra \
                ON ra.attrelid = c.confrelid AND ra.attnum = k.ref_attnum \
             WHERE c.conrelid = {regclass} AND c.contype = 'f' \
             ORDER BY c.conname, k.ord",
            actions = ACTION_CASE,
            regclass = self.regclass(table)
        );
        let rows = conn.query(&sql).await?;

        let mut fk_map: BTreeMap<String, ForeignKey> = BTreeMap::new();
        for i in 0..rows.len() {
            let name = rows.get_string(i, "constraint_name").unwrap_or_default();
            let fk = fk_map.entry(name.clone()).or_insert_with(|| ForeignKey {
                name,
                columns: Vec::new(),
                ref_table: rows.get_string(i, "ref_table").unwrap_or_default(),
                ref_columns: Vec::new(),
                on_delete: rows.get_string(i, "on_delete").unwrap_or_default(),
                on_update: rows.get_string(i, "on_update").unwrap_or_default(),
            });
            fk.columns
                .push(rows.get_string(i, "column_name").unwrap_or_default());
            fk.ref_columns
                .push(rows.get_string(i, "ref_column").unwrap_or_default());
        }

        let fks: Vec<ForeignKey> = fk_map.into_values().collect();
        debug!("Loaded {} foreign keys for {}", fks.len(), table);
        Ok(fks)
    }

    async fn has_table(&self, conn: &dyn Connection, table: &str) -> Result<bool> {
        self.relation_of_type(conn, table, "BASE TABLE").await
    }

    async fn has_view(&self, conn: &dyn Connection, view: &str) -> Result<bool> {
        self.relation_of_type(conn, view, "VIEW").await
    }

    async fn has_index(&self, conn: &dyn Connection, table: &str, index: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM pg_catalog.pg_indexes \
             WHERE schemaname = current_schema() AND tablename = {} AND indexname = {}",
            self.lit(table),
            self.lit(index)
        );
        self.count(conn, &sql).await
    }

    async fn primary_key_constraint(
        &self,
        conn: &dyn Connection,
        table: &str,
    ) -> Result<Option<String>> {
        let sql = format!(
            "SELECT conname::text AS name FROM pg_catalog.pg_constraint \
             WHERE conrelid = {} AND contype = 'p'",
            self.regclass(table)
        );
        let rows = conn.query(&sql).await?;
        Ok(rows.get_string(0, "name"))
    }
}
