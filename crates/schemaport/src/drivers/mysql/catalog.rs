//! MySQL/MariaDB catalog introspection via `INFORMATION_SCHEMA`.
//!
//! Every lookup is scoped to `DATABASE()`, the schema selected by the session.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use crate::core::traits::{Connection, Dialect, SchemaReader};
use crate::core::{Column, DefaultValue, ForeignKey, Index, IndexColumn, LogicalType};
use crate::drivers::parse_default;
use crate::error::Result;
use crate::typemap::{declared_length, infer_logical_type, parse_enum_values};

use super::MysqlDialect;

/// MySQL schema reader.
#[derive(Debug, Clone, Default)]
pub struct MysqlCatalog {
    dialect: MysqlDialect,
}

impl MysqlCatalog {
    /// Create a new MySQL catalog reader.
    pub fn new() -> Self {
        Self::default()
    }

    fn lit(&self, value: &str) -> String {
        self.dialect.quote_string(value)
    }

    async fn count(&self, conn: &dyn Connection, sql: &str) -> Result<bool> {
        Ok(conn.query(sql).await?.scalar_i64().unwrap_or(0) > 0)
    }

    async fn table_of_type(&self, conn: &dyn Connection, name: &str, kind: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {} AND TABLE_TYPE = {}",
            self.lit(name),
            self.lit(kind)
        );
        self.count(conn, &sql).await
    }
}

/// Interpret `COLUMN_DEFAULT`.
///
/// MySQL reports literal defaults unquoted and flags expressions with
/// `DEFAULT_GENERATED`; MariaDB quotes string literals.
fn column_default(raw: Option<String>, extra: &str, logical: LogicalType) -> Option<DefaultValue> {
    let raw = raw?;
    let upper = raw.trim().to_uppercase();

    if extra.to_uppercase().contains("DEFAULT_GENERATED")
        || upper.starts_with("CURRENT_TIMESTAMP")
        || upper.starts_with("NOW(")
    {
        return Some(DefaultValue::Expression(raw));
    }
    if raw.starts_with('\'') || upper == "NULL" {
        return Some(parse_default(&raw));
    }

    let value = match logical {
        LogicalType::Boolean => DefaultValue::Bool(raw.trim() != "0"),
        LogicalType::Integer => raw
            .trim()
            .parse()
            .map_or_else(|_| DefaultValue::Text(raw.clone()), DefaultValue::Int),
        LogicalType::Float => raw
            .trim()
            .parse()
            .map_or_else(|_| DefaultValue::Text(raw.clone()), DefaultValue::Float),
        _ => DefaultValue::Text(raw),
    };
    Some(value)
}

#[async_trait]
impl SchemaReader for MysqlCatalog {
    async fn list_tables(&self, conn: &dyn Connection) -> Result<Vec<String>> {
        // CAST to CHAR to handle collation differences
        let rows = conn
            .query(
                "SELECT CAST(TABLE_NAME AS CHAR(255)) AS table_name \
                 FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME",
            )
            .await?;
        Ok((0..rows.len())
            .filter_map(|i| rows.get_string(i, "table_name"))
            .collect())
    }

    async fn load_columns(&self, conn: &dyn Connection, table: &str) -> Result<Vec<Column>> {
        let sql = format!(
            "SELECT \
                CAST(COLUMN_NAME AS CHAR(255)) AS column_name, \
                CAST(COLUMN_TYPE AS CHAR(4000)) AS column_type, \
                IF(IS_NULLABLE = 'YES', 1, 0) AS is_nullable, \
                CAST(COLUMN_DEFAULT AS CHAR(4000)) AS column_default, \
                CAST(EXTRA AS CHAR(255)) AS extra \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {} \
             ORDER BY ORDINAL_POSITION",
            self.lit(table)
        );
        let rows = conn.query(&sql).await?;

        let mut columns = Vec::with_capacity(rows.len());
        for i in 0..rows.len() {
            let name = rows.get_string(i, "column_name").unwrap_or_default();
            let declared = rows.get_string(i, "column_type").unwrap_or_default();
            let extra = rows.get_string(i, "extra").unwrap_or_default();
            let (logical, native_array) = infer_logical_type(&declared);

            let mut column = Column::new(name, logical);
            column.is_nullable = rows.get_i64(i, "is_nullable").unwrap_or(1) == 1;
            column.native_array = native_array;
            column.auto_increment = extra.to_lowercase().contains("auto_increment");
            column.default = column_default(rows.get_string(i, "column_default"), &extra, logical);
            match logical {
                LogicalType::Enum => column.enum_values = parse_enum_values(&declared),
                LogicalType::Text | LogicalType::Binary => {
                    column.max_length = declared_length(&declared)
                }
                _ => {}
            }
            column.declared_type = declared;
            columns.push(column);
        }
        Ok(columns)
    }

    async fn load_primary_key(&self, conn: &dyn Connection, table: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT CAST(COLUMN_NAME AS CHAR(255)) AS column_name \
             FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {} AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION",
            self.lit(table)
        );
        let rows = conn.query(&sql).await?;
        Ok((0..rows.len())
            .filter_map(|i| rows.get_string(i, "column_name"))
            .collect())
    }

    async fn load_indexes(&self, conn: &dyn Connection, table: &str) -> Result<Vec<Index>> {
        let sql = format!(
            "SELECT \
                CAST(INDEX_NAME AS CHAR(255)) AS index_name, \
                CAST(COLUMN_NAME AS CHAR(255)) AS column_name, \
                IF(NON_UNIQUE = 0, 1, 0) AS is_unique, \
                IF(COLLATION = 'D', 1, 0) AS is_desc \
             FROM INFORMATION_SCHEMA.STATISTICS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {} AND INDEX_NAME <> 'PRIMARY' \
             ORDER BY INDEX_NAME, SEQ_IN_INDEX",
            self.lit(table)
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
                // functional key part; the index cannot be reproduced
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
        // CAST to CHAR to handle collation differences
        let sql = format!(
            "SELECT \
                CAST(rc.CONSTRAINT_NAME AS CHAR(255)) AS constraint_name, \
                CAST(kcu.COLUMN_NAME AS CHAR(255)) AS column_name, \
                CAST(kcu.REFERENCED_TABLE_NAME AS CHAR(255)) AS ref_table, \
                CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR(255)) AS ref_column, \
                CAST(rc.DELETE_RULE AS CHAR(32)) AS on_delete, \
                CAST(rc.UPDATE_RULE AS CHAR(32)) AS on_update \
             FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
             JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA \
                AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
                AND rc.TABLE_NAME = kcu.TABLE_NAME \
             WHERE rc.CONSTRAINT_SCHEMA = DATABASE() AND rc.TABLE_NAME = {} \
             ORDER BY rc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
            self.lit(table)
        );
        let rows = conn.query(&sql).await?;

        // Group by constraint name
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
        self.table_of_type(conn, table, "BASE TABLE").await
    }

    async fn has_view(&self, conn: &dyn Connection, view: &str) -> Result<bool> {
        self.table_of_type(conn, view, "VIEW").await
    }

    async fn has_index(&self, conn: &dyn Connection, table: &str, index: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.STATISTICS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {} AND INDEX_NAME = {}",
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
        // MySQL always names the primary key PRIMARY
        let has_pk = !self.load_primary_key(conn, table).await?.is_empty();
        Ok(has_pk.then(|| "PRIMARY".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_default_mysql_forms() {
        assert_eq!(
            column_default(Some("CURRENT_TIMESTAMP".into()), "DEFAULT_GENERATED", LogicalType::Timestamp),
            Some(DefaultValue::Expression("CURRENT_TIMESTAMP".into()))
        );
        assert_eq!(
            column_default(Some("uuid()".into()), "DEFAULT_GENERATED", LogicalType::Text),
            Some(DefaultValue::Expression("uuid()".into()))
        );
        assert_eq!(
            column_default(Some("pending".into()), "", LogicalType::Enum),
            Some(DefaultValue::Text("pending".into()))
        );
        assert_eq!(
            column_default(Some("1".into()), "", LogicalType::Boolean),
            Some(DefaultValue::Bool(true))
        );
        assert_eq!(
            column_default(Some("-5".into()), "", LogicalType::Integer),
            Some(DefaultValue::Int(-5))
        );
        assert_eq!(column_default(None, "", LogicalType::Text), None);
    }

    #[test]
    fn test_column_default_mariadb_quoted() {
        assert_eq!(
            column_default(Some("'it''s'".into()), "", LogicalType::Text),
            Some(DefaultValue::Text("it's".into()))
        );
        assert_eq!(
            column_default(Some("NULL".into()), "", LogicalType::Text),
            Some(DefaultValue::Null)
        );
    }
}
