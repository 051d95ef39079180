//! SQLite SQL dialect (Strategy pattern).

use crate::core::identifier::quote_with;
use crate::core::traits::Dialect;
use crate::core::DatabaseKind;

/// SQLite dialect implementation.
///
/// SQLite has no boolean type (1/0), cannot alter constraints in place and
/// has no practical index key limit.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Create a new SQLite dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_with(name, '"')
    }

    fn boolean_literal(&self, value: Option<bool>) -> String {
        match value {
            Some(true) => "1".into(),
            Some(false) => "0".into(),
            None => "NULL".into(),
        }
    }

    fn timestamp_cast(&self, normalized: &str) -> String {
        self.quote_string(normalized)
    }

    fn blob_literal(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex::encode_upper(bytes))
    }

    fn supports_in_place_constraint_alter(&self) -> bool {
        false
    }

    fn max_indexable_key_bytes(&self) -> usize {
        1_000_000_000
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
            .map(|c| format!("{q} = excluded.{q}", q = self.quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ON CONFLICT ({}) DO UPDATE SET {}", conflict, set)
    }

    fn foreign_key_checks_sql(&self, enabled: bool) -> String {
        format!("PRAGMA foreign_keys = {}", if enabled { "ON" } else { "OFF" })
    }

    fn sequence_reset_sql(&self, _table: &str, _column: &str, _next: i64) -> Option<String> {
        // INTEGER PRIMARY KEY always continues after the largest rowid.
        None
    }

    fn drop_index_sql(&self, _table: &str, index: &str) -> String {
        format!("DROP INDEX {}", self.quote_ident(index))
    }
}
