//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! PostgreSQL has native booleans, arrays and JSONB, and needs explicit casts
//! to tell text literals apart from structured values.

use crate::core::identifier::quote_with;
use crate::core::traits::Dialect;
use crate::core::DatabaseKind;

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_with(name, '"')
    }

    fn boolean_literal(&self, value: Option<bool>) -> String {
        match value {
            Some(true) => "TRUE".into(),
            Some(false) => "FALSE".into(),
            None => "NULL".into(),
        }
    }

    fn timestamp_cast(&self, normalized: &str) -> String {
        format!("{}::timestamp", self.quote_string(normalized))
    }

    fn blob_literal(&self, bytes: &[u8]) -> String {
        format!("'\\x{}'::bytea", hex::encode(bytes))
    }

    fn json_literal(&self, compact: &str) -> String {
        format!("{}::jsonb", self.quote_string(compact))
    }

    fn array_literal(&self, elements: &[String]) -> Option<String> {
        if elements.is_empty() {
            // ARRAY[] has no element type to infer; the column type resolves '{}'.
            return Some("'{}'".into());
        }
        Some(format!("ARRAY[{}]", elements.join(", ")))
    }

    fn supports_in_place_constraint_alter(&self) -> bool {
        true
    }

    fn max_indexable_key_bytes(&self) -> usize {
        // B-tree entries are limited to a third of an 8 KiB page
        2704
    }

    fn upsert_clause(&self, conflict_columns: &[String], update_columns: &[String]) -> String {
        let conflict = conflict_columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        if update_columns.is_empty() {
            return format!("ON CONFLICT ({}) DO NOTHING", conflict);
        }

        let set = update_columns
            .iter()
            .map(|c| format!("{q} = EXCLUDED.{q}", q = self.quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ON CONFLICT ({}) DO UPDATE SET {}", conflict, set)
    }

    fn foreign_key_checks_sql(&self, enabled: bool) -> String {
        // Skips FK triggers for this session; requires superuser or replication role.
        format!(
            "SET session_replication_role = {}",
            if enabled { "'origin'" } else { "'replica'" }
        )
    }

    fn sequence_reset_sql(&self, table: &str, column: &str, next: i64) -> Option<String> {
        Some(format!(
            "SELECT setval(pg_get_serial_sequence({}, {}), {}, false)",
            self.quote_string(&self.quote_ident(table)),
            self.quote_string(column),
            next
        ))
    }

    fn drop_index_sql(&self, _table: &str, index: &str) -> String {
        format!("DROP INDEX {}", self.quote_ident(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        let d = PostgresDialect::new();
        assert_eq!(d.quote_ident("name"), "\"name\"");
        assert_eq!(d.quote_ident("table\"name"), "\"table\"\"name\"");
        assert_eq!(d.quote_ident("\"Users\""), "\"Users\"");
    }

    #[test]
    fn test_literals() {
        let d = PostgresDialect::new();
        assert_eq!(d.boolean_literal(Some(true)), "TRUE");
        assert_eq!(d.boolean_literal(Some(false)), "FALSE");
        assert_eq!(
            d.timestamp_cast("2024-01-02 03:04:05"),
            "'2024-01-02 03:04:05'::timestamp"
        );
        assert_eq!(d.blob_literal(&[0xab, 0x01]), "'\\xab01'::bytea");
        assert_eq!(d.json_literal("{\"a\":1}"), "'{\"a\":1}'::jsonb");
    }

    #[test]
    fn test_array_literal() {
        let d = PostgresDialect::new();
        assert_eq!(
            d.array_literal(&["1".into(), "2".into()]).as_deref(),
            Some("ARRAY[1, 2]")
        );
        assert_eq!(d.array_literal(&[]).as_deref(), Some("'{}'"));
    }

    #[test]
    fn test_upsert_clause() {
        let d = PostgresDialect::new();
        assert_eq!(
            d.upsert_clause(&["id".into()], &["name".into()]),
            "ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""
        );
        assert_eq!(
            d.upsert_clause(&["id".into()], &[]),
            "ON CONFLICT (\"id\") DO NOTHING"
        );
    }

    #[test]
    fn test_sequence_reset_sql() {
        let d = PostgresDialect::new();
        assert_eq!(
            d.sequence_reset_sql("Users", "id", 11).as_deref(),
            Some("SELECT setval(pg_get_serial_sequence('\"Users\"', 'id'), 11, false)")
        );
    }
}
