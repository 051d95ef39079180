//! DDL statement rendering.
//!
//! Pure functions from schema metadata to SQL text for one dialect. Nothing
//! here touches a connection; [`super::SchemaOperations`] and the dump engine
//! decide when each statement runs.

use std::collections::HashSet;

use crate::convert::to_literal;
use crate::core::schema::referential_action;
use crate::core::traits::Dialect;
use crate::core::{Column, DatabaseKind, DefaultValue, ForeignKey, Index, Table};
use crate::typemap::{key_bytes, render_type};

/// Lowercased names of columns that take part in a key, index or foreign key.
pub fn keyed_columns(table: &Table) -> HashSet<String> {
    let mut keyed: HashSet<String> = table
        .primary_key
        .iter()
        .map(|c| c.to_lowercase())
        .collect();
    for index in &table.indexes {
        keyed.extend(index.columns.iter().map(|c| c.name.to_lowercase()));
    }
    for fk in &table.foreign_keys {
        keyed.extend(fk.columns.iter().map(|c| c.to_lowercase()));
    }
    keyed
}

/// Render one column definition (`name type [constraints]`).
///
/// `auto_increment` marks the table's generated key column. On SQLite it
/// becomes the rowid alias and carries its primary key inline.
pub fn column_definition(
    dialect: &dyn Dialect,
    column: &Column,
    keyed: bool,
    auto_increment: bool,
) -> String {
    let name = dialect.quote_ident(&column.name);

    if auto_increment {
        return match dialect.kind() {
            DatabaseKind::Sqlite => format!("{} INTEGER PRIMARY KEY", name),
            DatabaseKind::Mysql => format!("{} BIGINT NOT NULL AUTO_INCREMENT", name),
            DatabaseKind::Postgres => {
                format!("{} BIGINT GENERATED BY DEFAULT AS IDENTITY", name)
            }
        };
    }

    let sql_type = render_type(dialect.kind(), column, keyed);
    let mut def = format!("{} {}", name, sql_type);
    if !column.is_nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(clause) = default_clause(dialect, column, &sql_type) {
        def.push(' ');
        def.push_str(&clause);
    }
    def
}

/// `DEFAULT ...` clause for a column, if it has a default.
pub fn default_clause(dialect: &dyn Dialect, column: &Column, sql_type: &str) -> Option<String> {
    let default = column.default.as_ref()?;

    if default.is_current_timestamp() {
        let expr = if dialect.kind() == DatabaseKind::Mysql && sql_type.ends_with("(6)") {
            "CURRENT_TIMESTAMP(6)"
        } else {
            "CURRENT_TIMESTAMP"
        };
        return Some(format!("DEFAULT {}", expr));
    }

    let literal = match default {
        DefaultValue::Expression(expr) => return Some(format!("DEFAULT {}", parenthesize(expr))),
        other => {
            let value = other.to_value()?;
            to_literal(&value, Some(&column.type_info()), dialect)
        }
    };

    // MySQL only accepts expression defaults on BLOB, TEXT and JSON columns.
    let mysql_blob_like = dialect.kind() == DatabaseKind::Mysql
        && matches!(sql_type, "TEXT" | "LONGBLOB" | "JSON")
        && !matches!(default, DefaultValue::Null);
    if mysql_blob_like {
        Some(format!("DEFAULT ({})", literal))
    } else {
        Some(format!("DEFAULT {}", literal))
    }
}

/// Wrap an expression in parentheses unless it already is wrapped as a whole.
fn parenthesize(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.starts_with('(') {
        let mut depth = 0i32;
        for (i, c) in trimmed.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        if i == trimmed.len() - 1 {
                            return trimmed.to_string();
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    format!("({})", trimmed)
}

/// Default constraint name for the `ordinal`-th foreign key of `table`.
pub fn foreign_key_name(table: &str, fk: &ForeignKey, ordinal: usize) -> String {
    if fk.name.is_empty() {
        format!("fk_{}_{}", table, ordinal)
    } else {
        fk.name.clone()
    }
}

/// `FOREIGN KEY (...) REFERENCES ... [ON DELETE ..] [ON UPDATE ..]`.
pub fn foreign_key_clause(dialect: &dyn Dialect, fk: &ForeignKey) -> String {
    let mut clause = format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_list(dialect, &fk.columns),
        dialect.quote_ident(&fk.ref_table),
        quote_list(dialect, &fk.ref_columns)
    );
    for (keyword, action) in [("DELETE", &fk.on_delete), ("UPDATE", &fk.on_update)] {
        let action = referential_action(action);
        if action != "NO ACTION" {
            clause.push_str(&format!(" ON {} {}", keyword, action));
        }
    }
    clause
}

/// `CREATE TABLE` statement.
///
/// Foreign keys for which `inline_fk` returns false are left out so the caller
/// can add them after the referenced table exists.
pub fn create_table_sql(
    dialect: &dyn Dialect,
    table: &Table,
    inline_fk: impl Fn(&ForeignKey) -> bool,
) -> String {
    let keyed = keyed_columns(table);
    let auto = table.auto_increment_column().map(|c| c.name.clone());
    let inline_pk = dialect.kind() == DatabaseKind::Sqlite && auto.is_some();

    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let is_auto = auto.as_deref() == Some(c.name.as_str());
            column_definition(dialect, c, keyed.contains(&c.name.to_lowercase()), is_auto)
        })
        .collect();

    if table.has_pk() && !inline_pk {
        parts.push(format!(
            "PRIMARY KEY ({})",
            quote_list(dialect, &table.primary_key)
        ));
    }

    for (i, fk) in table.foreign_keys.iter().enumerate() {
        if !inline_fk(fk) {
            continue;
        }
        parts.push(format!(
            "CONSTRAINT {} {}",
            dialect.quote_ident(&foreign_key_name(&table.name, fk, i)),
            foreign_key_clause(dialect, fk)
        ));
    }

    format!(
        "CREATE TABLE {} (\n    {}\n)",
        dialect.quote_ident(&table.name),
        parts.join(",\n    ")
    )
}

/// `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY` for a deferred foreign key.
pub fn add_foreign_key_sql(
    dialect: &dyn Dialect,
    table: &str,
    fk: &ForeignKey,
    ordinal: usize,
) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {}",
        dialect.quote_ident(table),
        dialect.quote_ident(&foreign_key_name(table, fk, ordinal)),
        foreign_key_clause(dialect, fk)
    )
}

/// Statement dropping a named foreign key; `None` on SQLite, which has no
/// way to drop one.
pub fn drop_foreign_key_sql(dialect: &dyn Dialect, table: &str, name: &str) -> Option<String> {
    let keyword = match dialect.kind() {
        DatabaseKind::Sqlite => return None,
        DatabaseKind::Mysql => "FOREIGN KEY",
        DatabaseKind::Postgres => "CONSTRAINT",
    };
    Some(format!(
        "ALTER TABLE {} DROP {} {}",
        dialect.quote_ident(table),
        keyword,
        dialect.quote_ident(name)
    ))
}

/// `CREATE [UNIQUE] INDEX` statement.
pub fn create_index_sql(dialect: &dyn Dialect, table: &str, index: &Index) -> String {
    let columns = index
        .columns
        .iter()
        .map(|c| {
            let name = dialect.quote_ident(&c.name);
            if c.desc {
                format!("{} DESC", name)
            } else {
                name
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.is_unique { "UNIQUE " } else { "" },
        dialect.quote_ident(&index.name),
        dialect.quote_ident(table),
        columns
    )
}

/// `ALTER TABLE ... ADD COLUMN` statement.
pub fn add_column_sql(dialect: &dyn Dialect, table: &str, column: &Column) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        dialect.quote_ident(table),
        column_definition(dialect, column, false, false)
    )
}

/// Estimated key size of `index` over `columns` on `target`.
///
/// Columns missing from `columns` count as zero; the engine reports those itself.
pub fn index_key_bytes(target: DatabaseKind, columns: &[Column], index: &Index) -> usize {
    index
        .columns
        .iter()
        .filter_map(|ic| {
            columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&ic.name))
        })
        .map(|c| key_bytes(target, c))
        .fold(0usize, usize::saturating_add)
}

/// True when SQLite cannot add `column` with `ALTER TABLE ADD COLUMN`.
///
/// SQLite rejects added columns that are keys, NOT NULL without a constant
/// default, or defaulted to a non-constant expression.
pub fn sqlite_requires_recreate(column: &Column) -> bool {
    let constant_default = matches!(
        column.default,
        Some(ref d) if !matches!(d, DefaultValue::Null | DefaultValue::Expression(_))
    );
    let expression_default = matches!(column.default, Some(DefaultValue::Expression(_)));
    column.auto_increment || expression_default || (!column.is_nullable && !constant_default)
}

/// Multi-row `INSERT` of already rendered literals.
///
/// `suffix` is appended verbatim, e.g. an upsert clause.
pub fn insert_sql(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[String],
    rows: &[Vec<String>],
    suffix: Option<&str>,
) -> String {
    let values = rows
        .iter()
        .map(|row| format!("({})", row.join(", ")))
        .collect::<Vec<_>>()
        .join(",\n    ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES\n    {}",
        dialect.quote_ident(table),
        quote_list(dialect, columns),
        values
    );
    if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
        sql.push(' ');
        sql.push_str(suffix);
    }
    sql
}

/// Statement making an existing column NOT NULL, for engines that alter in place.
pub fn set_not_null_sql(dialect: &dyn Dialect, table: &str, column: &Column) -> Option<String> {
    match dialect.kind() {
        DatabaseKind::Sqlite => None,
        DatabaseKind::Mysql => {
            let mut column = column.clone();
            column.is_nullable = false;
            Some(format!(
                "ALTER TABLE {} MODIFY COLUMN {}",
                dialect.quote_ident(table),
                column_definition(dialect, &column, true, false)
            ))
        }
        DatabaseKind::Postgres => Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
            dialect.quote_ident(table),
            dialect.quote_ident(&column.name)
        )),
    }
}

/// Statement replacing a table's primary key in place.
///
/// `constraint` is the current key's constraint name, if any. Both halves run
/// in one statement so MySQL never sees an auto-increment column without a key.
pub fn replace_primary_key_sql(
    dialect: &dyn Dialect,
    table: &str,
    constraint: Option<&str>,
    columns: &[String],
) -> Option<String> {
    let add = format!("ADD PRIMARY KEY ({})", quote_list(dialect, columns));
    let drop = match (dialect.kind(), constraint) {
        (DatabaseKind::Sqlite, _) => return None,
        (DatabaseKind::Mysql, Some(_)) => Some("DROP PRIMARY KEY, ".to_string()),
        (DatabaseKind::Postgres, Some(name)) => {
            Some(format!("DROP CONSTRAINT {}, ", dialect.quote_ident(name)))
        }
        (_, None) => None,
    };
    Some(format!(
        "ALTER TABLE {} {}{}",
        dialect.quote_ident(table),
        drop.unwrap_or_default(),
        add
    ))
}

/// `ALTER TABLE ... ALTER COLUMN ... DROP DEFAULT`, for engines that alter in place.
pub fn drop_default_sql(dialect: &dyn Dialect, table: &str, column: &str) -> Option<String> {
    match dialect.kind() {
        DatabaseKind::Sqlite => None,
        DatabaseKind::Mysql | DatabaseKind::Postgres => Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
            dialect.quote_ident(table),
            dialect.quote_ident(column)
        )),
    }
}

/// `ALTER TABLE ... DROP COLUMN` statement.
pub fn drop_column_sql(dialect: &dyn Dialect, table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        dialect.quote_ident(table),
        dialect.quote_ident(column)
    )
}

fn quote_list(dialect: &dyn Dialect, names: &[String]) -> String {
    names
        .iter()
        .map(|n| dialect.quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{IndexColumn, LogicalType};
    use crate::drivers::DialectImpl;

    fn accounts() -> Table {
        Table::new("accounts")
            .column(Column::new("id", LogicalType::Integer).not_null().auto_increment())
            .column(Column::new("email", LogicalType::Text).not_null())
            .column(
                Column::new("is_active", LogicalType::Boolean)
                    .not_null()
                    .default_value(DefaultValue::Bool(true)),
            )
            .column(
                Column::new("created_at", LogicalType::Timestamp)
                    .default_value(DefaultValue::Expression("CURRENT_TIMESTAMP".into())),
            )
            .column(Column::new("org_id", LogicalType::Integer))
            .primary_key(["id"])
            .index(Index::new("accounts_email_idx", ["email"]).unique())
            .foreign_key(ForeignKey::new(["org_id"], "orgs", ["id"]).on_delete("cascade"))
    }

    #[test]
    fn test_create_table_sqlite() {
        let d = DialectImpl::for_kind(DatabaseKind::Sqlite);
        let sql = create_table_sql(&d, &accounts(), |_| true);
        assert_eq!(
            sql,
            "CREATE TABLE \"accounts\" (\n    \
             \"id\" INTEGER PRIMARY KEY,\n    \
             \"email\" TEXT NOT NULL,\n    \
             \"is_active\" INTEGER NOT NULL DEFAULT 1,\n    \
             \"created_at\" DATETIME DEFAULT CURRENT_TIMESTAMP,\n    \
             \"org_id\" INTEGER,\n    \
             CONSTRAINT \"fk_accounts_0\" FOREIGN KEY (\"org_id\") REFERENCES \"orgs\" (\"id\") ON DELETE CASCADE\n)"
        );
    }

    #[test]
    fn test_create_table_mysql() {
        let d = DialectImpl::for_kind(DatabaseKind::Mysql);
        let sql = create_table_sql(&d, &accounts(), |_| false);
        assert!(sql.contains("`id` BIGINT NOT NULL AUTO_INCREMENT"));
        // Indexed text without a length must be bounded on MySQL.
        assert!(sql.contains("`email` VARCHAR(255) NOT NULL"));
        assert!(sql.contains("`is_active` TINYINT(1) NOT NULL DEFAULT 1"));
        assert!(sql.contains("`created_at` DATETIME(6) DEFAULT CURRENT_TIMESTAMP(6)"));
        assert!(sql.contains("PRIMARY KEY (`id`)"));
        assert!(!sql.contains("FOREIGN KEY"));
    }

    #[test]
    fn test_create_table_postgres() {
        let d = DialectImpl::for_kind(DatabaseKind::Postgres);
        let sql = create_table_sql(&d, &accounts(), |_| true);
        assert!(sql.contains("\"id\" BIGINT GENERATED BY DEFAULT AS IDENTITY"));
        assert!(sql.contains("\"is_active\" BOOLEAN NOT NULL DEFAULT TRUE"));
        assert!(sql.contains("\"email\" TEXT NOT NULL"));
        assert!(sql.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn test_composite_key_is_a_table_constraint() {
        let table = Table::new("memberships")
            .column(Column::new("id", LogicalType::Integer).not_null().auto_increment())
            .column(Column::new("tenant_id", LogicalType::Text).not_null())
            .primary_key(["id", "tenant_id"]);
        let d = DialectImpl::for_kind(DatabaseKind::Sqlite);
        let sql = create_table_sql(&d, &table, |_| true);
        assert!(sql.contains("\"id\" INTEGER NOT NULL"));
        assert!(sql.contains("PRIMARY KEY (\"id\", \"tenant_id\")"));
    }

    #[test]
    fn test_default_clauses() {
        let mysql = DialectImpl::for_kind(DatabaseKind::Mysql);
        let note = Column::new("note", LogicalType::Text).default_value(DefaultValue::Text("n/a".into()));
        assert_eq!(
            default_clause(&mysql, &note, "TEXT").as_deref(),
            Some("DEFAULT ('n/a')")
        );

        let sqlite = DialectImpl::for_kind(DatabaseKind::Sqlite);
        let stamp = Column::new("ts", LogicalType::Text)
            .default_value(DefaultValue::Expression("datetime('now')".into()));
        assert_eq!(
            default_clause(&sqlite, &stamp, "TEXT").as_deref(),
            Some("DEFAULT (datetime('now'))")
        );
        let wrapped = Column::new("ts", LogicalType::Text)
            .default_value(DefaultValue::Expression("(datetime('now'))".into()));
        assert_eq!(
            default_clause(&sqlite, &wrapped, "TEXT").as_deref(),
            Some("DEFAULT (datetime('now'))")
        );
        assert!(default_clause(&sqlite, &Column::new("x", LogicalType::Text), "TEXT").is_none());
    }

    #[test]
    fn test_parenthesize() {
        assert_eq!(parenthesize("a + b"), "(a + b)");
        assert_eq!(parenthesize("(a + b)"), "(a + b)");
        assert_eq!(parenthesize("(a) + (b)"), "((a) + (b))");
    }

    #[test]
    fn test_create_index_sql() {
        let index = Index {
            name: "events_recent".into(),
            columns: vec![IndexColumn::asc("kind"), IndexColumn::desc("created_at")],
            is_unique: false,
        };
        let d = DialectImpl::for_kind(DatabaseKind::Postgres);
        assert_eq!(
            create_index_sql(&d, "events", &index),
            "CREATE INDEX \"events_recent\" ON \"events\" (\"kind\", \"created_at\" DESC)"
        );
        let mysql = DialectImpl::for_kind(DatabaseKind::Mysql);
        assert_eq!(
            create_index_sql(&mysql, "events", &index.clone().unique()),
            "CREATE UNIQUE INDEX `events_recent` ON `events` (`kind`, `created_at` DESC)"
        );
    }

    #[test]
    fn test_add_foreign_key_sql() {
        let d = DialectImpl::for_kind(DatabaseKind::Postgres);
        let fk = ForeignKey::new(["parent_id"], "nodes", ["id"]);
        assert_eq!(
            add_foreign_key_sql(&d, "nodes", &fk, 2),
            "ALTER TABLE \"nodes\" ADD CONSTRAINT \"fk_nodes_2\" FOREIGN KEY (\"parent_id\") REFERENCES \"nodes\" (\"id\")"
        );
    }

    #[test]
    fn test_drop_foreign_key_sql() {
        let pg = DialectImpl::for_kind(DatabaseKind::Postgres);
        let mysql = DialectImpl::for_kind(DatabaseKind::Mysql);
        let sqlite = DialectImpl::for_kind(DatabaseKind::Sqlite);
        assert_eq!(
            drop_foreign_key_sql(&pg, "tasks", "tasks_owner_id_fkey").as_deref(),
            Some("ALTER TABLE \"tasks\" DROP CONSTRAINT \"tasks_owner_id_fkey\"")
        );
        assert_eq!(
            drop_foreign_key_sql(&mysql, "tasks", "fk_tasks_0").as_deref(),
            Some("ALTER TABLE `tasks` DROP FOREIGN KEY `fk_tasks_0`")
        );
        assert_eq!(drop_foreign_key_sql(&sqlite, "tasks", "fk_tasks_0"), None);
    }

    #[test]
    fn test_index_key_bytes() {
        let columns = vec![
            Column::new("a", LogicalType::Text).max_length(500),
            Column::new("b", LogicalType::Integer),
        ];
        let index = Index::new("ab", ["a", "b", "missing"]);
        assert_eq!(index_key_bytes(DatabaseKind::Mysql, &columns, &index), 2008);
    }

    #[test]
    fn test_sqlite_requires_recreate() {
        assert!(!sqlite_requires_recreate(&Column::new("x", LogicalType::Text)));
        assert!(!sqlite_requires_recreate(
            &Column::new("x", LogicalType::Text)
                .not_null()
                .default_value(DefaultValue::Text("a".into()))
        ));
        assert!(sqlite_requires_recreate(&Column::new("x", LogicalType::Text).not_null()));
        assert!(sqlite_requires_recreate(
            &Column::new("x", LogicalType::Timestamp)
                .default_value(DefaultValue::Expression("CURRENT_TIMESTAMP".into()))
        ));
    }

    #[test]
    fn test_insert_sql() {
        let d = DialectImpl::for_kind(DatabaseKind::Postgres);
        let sql = insert_sql(
            &d,
            "users",
            &["id".to_string(), "name".to_string()],
            &[
                vec!["1".to_string(), "'a'".to_string()],
                vec!["2".to_string(), "NULL".to_string()],
            ],
            Some("ON CONFLICT (\"id\") DO NOTHING"),
        );
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\", \"name\") VALUES\n    (1, 'a'),\n    (2, NULL) ON CONFLICT (\"id\") DO NOTHING"
        );
    }

    #[test]
    fn test_in_place_alters() {
        let key = vec!["id".to_string(), "tenant_id".to_string()];
        let sqlite = DialectImpl::for_kind(DatabaseKind::Sqlite);
        assert!(replace_primary_key_sql(&sqlite, "t", None, &key).is_none());

        let mysql = DialectImpl::for_kind(DatabaseKind::Mysql);
        assert_eq!(
            replace_primary_key_sql(&mysql, "t", Some("PRIMARY"), &key).as_deref(),
            Some("ALTER TABLE `t` DROP PRIMARY KEY, ADD PRIMARY KEY (`id`, `tenant_id`)")
        );
        let tenant = Column::new("tenant_id", LogicalType::Text);
        assert_eq!(
            set_not_null_sql(&mysql, "t", &tenant).as_deref(),
            Some("ALTER TABLE `t` MODIFY COLUMN `tenant_id` VARCHAR(255) NOT NULL")
        );

        let pg = DialectImpl::for_kind(DatabaseKind::Postgres);
        assert_eq!(
            replace_primary_key_sql(&pg, "t", Some("t_pkey"), &key).as_deref(),
            Some("ALTER TABLE \"t\" DROP CONSTRAINT \"t_pkey\", ADD PRIMARY KEY (\"id\", \"tenant_id\")")
        );
        assert_eq!(
            set_not_null_sql(&pg, "t", &tenant).as_deref(),
            Some("ALTER TABLE \"t\" ALTER COLUMN \"tenant_id\" SET NOT NULL")
        );
    }
}
