//! Recreate-and-restore.
//!
//! Used where a table cannot be altered in place: the rows are captured into
//! a [`TableSnapshot`], the table is dropped and created again with the new
//! definition, and every captured row is inserted back.
//!
//! All checks that can fail on existing data run before the drop. Once the
//! drop has happened, any error is reported with `restore_in_progress` set.
//! Restore INSERTs are never retried, so a lost connection during the
//! restore ends up there too.
//!
//! PostgreSQL refuses to drop a table that other tables reference by foreign
//! key, even with checks suspended. There the referencing constraints are
//! dropped first and added back once the rows are restored.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::convert::{preserving_literal, to_json};
use crate::core::traits::Dialect;
use crate::core::{
    ColumnTypeInfo, DatabaseKind, DefaultValue, ForeignKey, LogicalType, SqlValue, Table,
};
use crate::error::{PortError, Result};
use crate::schema_ops::{ddl, SchemaOperations};

/// Rows per INSERT statement during restore.
pub const RESTORE_CHUNK_ROWS: usize = 500;

/// All rows of one table, held in memory for the duration of a recreate.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub table_name: String,
    pub columns: Vec<String>,
    pub column_types: Vec<ColumnTypeInfo>,
    pub rows: Vec<Vec<SqlValue<'static>>>,
}

impl TableSnapshot {
    /// Read every row of `table`, in primary key order when it has one.
    pub async fn capture(ops: &SchemaOperations, table: &Table) -> Result<Self> {
        let rows = ops
            .read_rows(&table.name, &table.primary_key, None, None)
            .await?;
        let column_types = rows
            .columns
            .iter()
            .map(|name| {
                table
                    .find_column(name)
                    .map(|c| c.type_info())
                    .unwrap_or_else(|| ColumnTypeInfo::new(name.clone(), LogicalType::Text))
            })
            .collect();

        debug!("Captured {} rows of {}", rows.len(), table.name);
        Ok(Self {
            table_name: table.name.clone(),
            columns: rows.columns,
            column_types,
            rows: rows.rows,
        })
    }

    /// Number of captured rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// True if any captured row has NULL in `column`.
    fn has_nulls(&self, column: &str) -> bool {
        match self.column_position(column) {
            Some(idx) => self.rows.iter().any(|row| row[idx].is_null()),
            None => false,
        }
    }
}

/// How to rebuild a table.
#[derive(Debug, Clone)]
pub struct RecreatePlan {
    /// New definition; its name must match the existing table.
    pub target: Table,
    /// Values for columns absent from the snapshot.
    ///
    /// Columns without an entry fall back to their declared default.
    pub fill: HashMap<String, SqlValue<'static>>,
}

impl RecreatePlan {
    pub fn new(target: Table) -> Self {
        Self {
            target,
            fill: HashMap::new(),
        }
    }

    /// Fill `column` with `value` on every restored row.
    pub fn fill(mut self, column: impl Into<String>, value: SqlValue<'static>) -> Self {
        self.fill.insert(column.into().to_lowercase(), value);
        self
    }
}

/// Outcome of a completed recreate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    pub rows_before: usize,
    pub rows_after: usize,
}

/// Rebuild a table per `plan`, preserving its rows.
///
/// Errors raised after the drop are wrapped in [`PortError::Migration`] for
/// `step_id` with `restore_in_progress` set.
pub async fn recreate_table(
    ops: &SchemaOperations,
    step_id: i64,
    plan: &RecreatePlan,
) -> Result<RestoreReport> {
    let name = plan.target.name.as_str();
    let current = ops.load_table(name).await?;
    let snapshot = TableSnapshot::capture(ops, &current).await?;
    validate(&snapshot, plan)?;

    info!(
        "Recreating table {} ({} rows) on {}",
        name,
        snapshot.len(),
        ops.dialect().name()
    );

    let inbound = if ops.kind() == DatabaseKind::Postgres {
        inbound_foreign_keys(ops, name).await?
    } else {
        Vec::new()
    };

    ops.foreign_key_checks(false).await?;
    if let Err(e) = detach_and_drop(ops, name, &inbound).await {
        ops.foreign_key_checks(true).await?;
        return Err(e);
    }
    let restored = match restore(ops, &snapshot, plan).await {
        Ok(rows) => reattach(ops, &inbound).await.map(|()| rows),
        Err(e) => Err(e),
    };
    let reenabled = ops.foreign_key_checks(true).await;

    let rows_after = restored.map_err(|e| PortError::Migration {
        step_id,
        restore_in_progress: true,
        source: Box::new(e),
    })?;
    if let Err(e) = reenabled {
        warn!("Could not re-enable foreign key checks after recreating {}", name);
        return Err(e);
    }

    info!("Restored {} rows into {}", rows_after, name);
    Ok(RestoreReport {
        rows_before: snapshot.len(),
        rows_after,
    })
}

/// Foreign keys of other tables that reference `table`, with the name of
/// the table declaring each.
pub async fn inbound_foreign_keys(
    ops: &SchemaOperations,
    table: &str,
) -> Result<Vec<(String, ForeignKey)>> {
    let mut inbound = Vec::new();
    for name in ops.list_tables().await? {
        if name.eq_ignore_ascii_case(table) {
            continue;
        }
        let other = ops.load_table(&name).await?;
        for fk in other.foreign_keys {
            if fk.ref_table.eq_ignore_ascii_case(table) {
                inbound.push((other.name.clone(), fk));
            }
        }
    }
    Ok(inbound)
}

/// Drop the inbound foreign keys, then the table. On failure the keys
/// dropped so far are added back.
async fn detach_and_drop(
    ops: &SchemaOperations,
    table: &str,
    inbound: &[(String, ForeignKey)],
) -> Result<()> {
    let mut detached = 0;
    let mut outcome = Ok(());
    for (owner, fk) in inbound {
        let Some(sql) = ddl::drop_foreign_key_sql(ops.dialect(), owner, &fk.name) else {
            continue;
        };
        if let Err(e) = ops.execute(&sql).await {
            outcome = Err(e);
            break;
        }
        debug!("Dropped foreign key {} of {}", fk.name, owner);
        detached += 1;
    }
    if outcome.is_ok() {
        outcome = ops.drop_table_if_exists(table).await.map(|_| ());
    }
    if let Err(e) = outcome {
        reattach(ops, &inbound[..detached]).await?;
        return Err(e);
    }
    Ok(())
}

async fn reattach(ops: &SchemaOperations, inbound: &[(String, ForeignKey)]) -> Result<()> {
    for (i, (owner, fk)) in inbound.iter().enumerate() {
        ops.execute(&ddl::add_foreign_key_sql(ops.dialect(), owner, fk, i))
            .await?;
        debug!("Restored foreign key {} of {}", fk.name, owner);
    }
    Ok(())
}

/// Checks that must pass before any data is dropped.
fn validate(snapshot: &TableSnapshot, plan: &RecreatePlan) -> Result<()> {
    let target = &plan.target;

    for column in &target.columns {
        let captured = snapshot.column_position(&column.name).is_some();
        let keyed = target
            .primary_key
            .iter()
            .any(|k| k.eq_ignore_ascii_case(&column.name));
        let required = keyed || !column.is_nullable;

        if captured {
            if required && snapshot.has_nulls(&column.name) {
                let what = if keyed { "primary key member" } else { "NOT NULL column" };
                return Err(PortError::invariant(
                    &target.name,
                    format!(
                        "column {} holds NULL values and cannot become a {}",
                        column.name, what
                    ),
                ));
            }
            continue;
        }

        let filled = plan
            .fill
            .get(&column.name.to_lowercase())
            .is_some_and(|v| !v.is_null());
        let defaulted = column
            .default
            .as_ref()
            .is_some_and(|d| !matches!(d, DefaultValue::Null));
        let generated = target
            .auto_increment_column()
            .is_some_and(|c| c.name.eq_ignore_ascii_case(&column.name));
        if required && !snapshot.is_empty() && !(filled || defaulted || generated) {
            return Err(PortError::invariant(
                &target.name,
                format!(
                    "new column {} is required but has neither a fill value nor a default",
                    column.name
                ),
            ));
        }
    }

    let key_known = target.primary_key.iter().all(|k| {
        snapshot.column_position(k).is_some() || plan.fill.contains_key(&k.to_lowercase())
    });
    if target.has_pk() && key_known {
        let positions: Vec<Option<usize>> = target
            .primary_key
            .iter()
            .map(|k| snapshot.column_position(k))
            .collect();
        let mut seen = HashSet::with_capacity(snapshot.len());
        for row in &snapshot.rows {
            let key: Vec<String> = positions
                .iter()
                .zip(&target.primary_key)
                .map(|(pos, column)| match pos {
                    Some(idx) => to_json(&row[*idx]).to_string(),
                    None => plan
                        .fill
                        .get(&column.to_lowercase())
                        .map(|v| to_json(v).to_string())
                        .unwrap_or_default(),
                })
                .collect();
            if !seen.insert(key.clone()) {
                return Err(PortError::invariant(
                    &target.name,
                    format!(
                        "existing rows repeat the key ({}) = ({})",
                        target.primary_key.join(", "),
                        key.join(", ")
                    ),
                ));
            }
        }
    }

    Ok(())
}

async fn restore(
    ops: &SchemaOperations,
    snapshot: &TableSnapshot,
    plan: &RecreatePlan,
) -> Result<usize> {
    let target = &plan.target;
    ops.create_table_if_absent(target).await?;

    // Columns that survive take their captured value; new ones take the fill value.
    // New columns without a fill value are left to their declared default.
    let mut columns = Vec::new();
    let mut types = Vec::new();
    let mut sources = Vec::new();
    for column in &target.columns {
        let source = match snapshot.column_position(&column.name) {
            Some(idx) => Source::Captured(idx),
            None => match plan.fill.get(&column.name.to_lowercase()) {
                Some(value) => Source::Fill(value),
                None => continue,
            },
        };
        columns.push(column.name.clone());
        types.push(column.type_info());
        sources.push(source);
    }

    let dialect = ops.dialect();
    for chunk in snapshot.rows.chunks(RESTORE_CHUNK_ROWS) {
        let literals: Vec<Vec<String>> = chunk
            .iter()
            .map(|row| {
                sources
                    .iter()
                    .zip(&types)
                    .map(|(source, ty)| match source {
                        Source::Captured(idx) => preserving_literal(&row[*idx], Some(ty), dialect),
                        Source::Fill(value) => preserving_literal(value, Some(ty), dialect),
                    })
                    .collect()
            })
            .collect();
        let sql = ddl::insert_sql(dialect, &target.name, &columns, &literals, None);
        // A retried INSERT could land twice if the first one committed
        // before the connection dropped.
        ops.execute_once(&sql).await?;
    }

    if let Some(auto) = target.auto_increment_column() {
        if let Some(max) = ops.max_value(&target.name, &auto.name).await? {
            if let Some(sql) = dialect.sequence_reset_sql(&target.name, &auto.name, max + 1) {
                ops.execute(&sql).await?;
            }
        }
    }

    let rows_after = usize::try_from(ops.row_count(&target.name).await?).unwrap_or(0);
    if rows_after != snapshot.len() {
        return Err(PortError::invariant(
            &target.name,
            format!(
                "restored {} rows but {} were captured",
                rows_after,
                snapshot.len()
            ),
        ));
    }
    Ok(rows_after)
}

enum Source<'a> {
    Captured(usize),
    Fill(&'a SqlValue<'static>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Column;
    use crate::drivers::SqliteConnection;
    use crate::retry::ResilientExecutor;
    use std::sync::Arc;

    fn snapshot(columns: &[&str], rows: Vec<Vec<SqlValue<'static>>>) -> TableSnapshot {
        TableSnapshot {
            table_name: "t".into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            column_types: Vec::new(),
            rows,
        }
    }

    fn target() -> Table {
        Table::new("t")
            .column(Column::new("id", LogicalType::Integer).not_null())
            .column(Column::new("tenant_id", LogicalType::Text).not_null())
            .primary_key(["id", "tenant_id"])
    }

    #[test]
    fn test_new_required_column_needs_a_value() {
        let snap = snapshot(&["id"], vec![vec![SqlValue::Int(1)]]);
        let err = validate(&snap, &RecreatePlan::new(target())).unwrap_err();
        assert!(matches!(err, PortError::InvariantViolation { .. }));

        let plan = RecreatePlan::new(target()).fill("tenant_id", SqlValue::from("acme"));
        validate(&snap, &plan).unwrap();

        let mut defaulted = target();
        defaulted.columns[1].default = Some(DefaultValue::Text("acme".into()));
        validate(&snap, &RecreatePlan::new(defaulted)).unwrap();
    }

    #[test]
    fn test_nullable_key_member_is_rejected() {
        let snap = snapshot(
            &["id", "tenant_id"],
            vec![
                vec![SqlValue::Int(1), SqlValue::from("acme")],
                vec![SqlValue::Int(2), SqlValue::Null],
            ],
        );
        let err = validate(&snap, &RecreatePlan::new(target())).unwrap_err();
        assert!(err.to_string().contains("primary key member"), "{}", err);
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let snap = snapshot(
            &["id", "tenant_id"],
            vec![
                vec![SqlValue::Int(1), SqlValue::from("acme")],
                vec![SqlValue::Int(1), SqlValue::from("acme")],
            ],
        );
        let err = validate(&snap, &RecreatePlan::new(target())).unwrap_err();
        assert!(err.to_string().contains("repeat the key"), "{}", err);
    }

    #[tokio::test]
    async fn test_inbound_foreign_keys_skip_self_references() {
        let conn = SqliteConnection::in_memory().await.unwrap();
        let ops = SchemaOperations::new(Arc::new(conn), ResilientExecutor::default());
        for sql in [
            "CREATE TABLE users (id INTEGER PRIMARY KEY)",
            "CREATE TABLE tasks (id INTEGER PRIMARY KEY, owner_id INTEGER REFERENCES users(id))",
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES notes(id))",
        ] {
            ops.execute(sql).await.unwrap();
        }

        let inbound = inbound_foreign_keys(&ops, "users").await.unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].0, "tasks");
        assert_eq!(inbound[0].1.columns, vec!["owner_id".to_string()]);
        assert!(inbound_foreign_keys(&ops, "notes").await.unwrap().is_empty());
    }

    #[test]
    fn test_empty_table_needs_no_fill() {
        let snap = snapshot(&["id"], Vec::new());
        validate(&snap, &RecreatePlan::new(target())).unwrap();
    }
}
