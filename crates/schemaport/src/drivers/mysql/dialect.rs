//! MySQL/MariaDB SQL dialect (Strategy pattern).
//!
//! Compatible with MySQL 5.7+, 8.0+, and MariaDB 10.2+.

use crate::core::identifier::quote_with;
use crate::core::traits::Dialect;
use crate::core::DatabaseKind;

/// MySQL/MariaDB dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Mysql
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_with(name, '`')
    }

    fn quote_string(&self, value: &str) -> String {
        // Backslash is an escape character unless NO_BACKSLASH_ESCAPES is set.
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
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
        true
    }

    fn max_indexable_key_bytes(&self) -> usize {
        // InnoDB with DYNAMIC/COMPRESSED row format
        3072
    }

    fn upsert_clause(&self, conflict_columns: &[String], update_columns: &[String]) -> String {
        // MySQL resolves conflicts against every unique key, not a named column list.
        let assignments = if update_columns.is_empty() {
            conflict_columns
                .first()
                .map(|c| format!("{q} = {q}", q = self.quote_ident(c)))
                .into_iter()
                .collect::<Vec<_>>()
        } else {
            update_columns
                .iter()
                .map(|c| format!("{q} = VALUES({q})", q = self.quote_ident(c)))
                .collect()
        };
        format!("ON DUPLICATE KEY UPDATE {}", assignments.join(", "))
    }

    fn foreign_key_checks_sql(&self, enabled: bool) -> String {
        format!("SET FOREIGN_KEY_CHECKS = {}", u8::from(enabled))
    }

    fn sequence_reset_sql(&self, table: &str, _column: &str, next: i64) -> Option<String> {
        Some(format!(
            "ALTER TABLE {} AUTO_INCREMENT = {}",
            self.quote_ident(table),
            next
        ))
    }

    fn drop_index_sql(&self, table: &str, index: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_ident(index),
            self.quote_ident(table)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        let d = MysqlDialect::new();
        assert_eq!(d.quote_ident("name"), "`name`");
        assert_eq!(d.quote_ident("table`name"), "`table``name`");
        assert_eq!(d.quote_ident("`name`"), "`name`");
    }

    #[test]
    fn test_quote_string_escapes_backslash() {
        let d = MysqlDialect::new();
        assert_eq!(d.quote_string(r"C:\temp"), r"'C:\\temp'");
        assert_eq!(d.quote_string("it's"), "'it''s'");
    }

    #[test]
    fn test_boolean_literal() {
        let d = MysqlDialect::new();
        assert_eq!(d.boolean_literal(Some(true)), "1");
        assert_eq!(d.boolean_literal(Some(false)), "0");
    }

    #[test]
    fn test_upsert_clause() {
        let d = MysqlDialect::new();
        assert_eq!(
            d.upsert_clause(&["id".into()], &["name".into(), "email".into()]),
            "ON DUPLICATE KEY UPDATE `name` = VALUES(`name`), `email` = VALUES(`email`)"
        );
        assert_eq!(
            d.upsert_clause(&["id".into()], &[]),
            "ON DUPLICATE KEY UPDATE `id` = `id`"
        );
    }

    #[test]
    fn test_sequence_reset_and_drop_index() {
        let d = MysqlDialect::new();
        assert_eq!(
            d.sequence_reset_sql("users", "id", 42).as_deref(),
            Some("ALTER TABLE `users` AUTO_INCREMENT = 42")
        );
        assert_eq!(d.drop_index_sql("users", "idx_a"), "DROP INDEX `idx_a` ON `users`");
        assert_eq!(d.foreign_key_checks_sql(true), "SET FOREIGN_KEY_CHECKS = 1");
    }
}
