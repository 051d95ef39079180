//! Bookkeeping tables.
//!
//! `_schemaport_history` records when each step was applied. It is shown by
//! `status` and never consulted to decide whether a step runs; that decision is
//! always a live catalog check.
//!
//! `_schemaport_markers` holds explicit operator decisions, such as which
//! tenant a multi-tenant table is consolidated into.

use chrono::Utc;

use crate::convert::timestamp::TIMESTAMP_FORMAT;
use crate::core::traits::Dialect;
use crate::core::{Column, LogicalType, Table};
use crate::error::Result;
use crate::schema_ops::SchemaOperations;

/// Ledger of applied migration steps.
pub const HISTORY_TABLE: &str = "_schemaport_history";

/// Named operator decisions.
pub const MARKER_TABLE: &str = "_schemaport_markers";

/// Prefix shared by every bookkeeping table.
pub const BOOKKEEPING_PREFIX: &str = "_schemaport_";

/// True for tables owned by schemaport itself.
pub fn is_bookkeeping_table(name: &str) -> bool {
    name.to_lowercase().starts_with(BOOKKEEPING_PREFIX)
}

fn history_table() -> Table {
    Table::new(HISTORY_TABLE)
        .column(Column::new("id", LogicalType::Integer).not_null())
        .column(
            Column::new("description", LogicalType::Text)
                .not_null()
                .max_length(255),
        )
        .column(
            Column::new("applied_at", LogicalType::Text)
                .not_null()
                .max_length(32),
        )
        .primary_key(["id"])
}

fn marker_table() -> Table {
    Table::new(MARKER_TABLE)
        .column(Column::new("name", LogicalType::Text).not_null().max_length(191))
        .column(Column::new("value", LogicalType::Text).not_null().max_length(255))
        .primary_key(["name"])
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: i64,
    pub description: String,
    pub applied_at: String,
}

/// Record that step `id` was applied now, replacing any earlier entry.
pub async fn record_applied(ops: &SchemaOperations, id: i64, description: &str) -> Result<()> {
    ops.create_table_if_absent(&history_table()).await?;
    forget(ops, id).await?;

    let d = ops.dialect();
    let applied_at = Utc::now().naive_utc().format(TIMESTAMP_FORMAT).to_string();
    let sql = format!(
        "INSERT INTO {} ({}, {}, {}) VALUES ({}, {}, {})",
        d.quote_ident(HISTORY_TABLE),
        d.quote_ident("id"),
        d.quote_ident("description"),
        d.quote_ident("applied_at"),
        id,
        d.quote_string(truncate(description, 255)),
        d.quote_string(&applied_at)
    );
    ops.execute(&sql).await?;
    Ok(())
}

/// Remove the entry for step `id`, if the ledger exists.
pub async fn forget(ops: &SchemaOperations, id: i64) -> Result<()> {
    if !ops.has_table(HISTORY_TABLE).await? {
        return Ok(());
    }
    let d = ops.dialect();
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        d.quote_ident(HISTORY_TABLE),
        d.quote_ident("id"),
        id
    );
    ops.execute(&sql).await?;
    Ok(())
}

/// All ledger entries in id order; empty when the ledger does not exist.
pub async fn load_history(ops: &SchemaOperations) -> Result<Vec<HistoryEntry>> {
    if !ops.has_table(HISTORY_TABLE).await? {
        return Ok(Vec::new());
    }
    let rows = ops
        .read_rows(HISTORY_TABLE, &["id".to_string()], None, None)
        .await?;
    Ok((0..rows.len())
        .filter_map(|i| {
            Some(HistoryEntry {
                id: rows.get_i64(i, "id")?,
                description: rows.get_string(i, "description").unwrap_or_default(),
                applied_at: rows.get_string(i, "applied_at").unwrap_or_default(),
            })
        })
        .collect())
}

/// Store a marker, replacing any earlier value.
pub async fn set_marker(ops: &SchemaOperations, name: &str, value: &str) -> Result<()> {
    ops.create_table_if_absent(&marker_table()).await?;
    let d = ops.dialect();
    let delete = format!(
        "DELETE FROM {} WHERE {} = {}",
        d.quote_ident(MARKER_TABLE),
        d.quote_ident("name"),
        d.quote_string(name)
    );
    ops.execute(&delete).await?;
    let insert = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {})",
        d.quote_ident(MARKER_TABLE),
        d.quote_ident("name"),
        d.quote_ident("value"),
        d.quote_string(name),
        d.quote_string(value)
    );
    ops.execute(&insert).await?;
    Ok(())
}

/// Read a marker; `None` when it or the marker table is absent.
pub async fn get_marker(ops: &SchemaOperations, name: &str) -> Result<Option<String>> {
    if !ops.has_table(MARKER_TABLE).await? {
        return Ok(None);
    }
    let d = ops.dialect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        d.quote_ident("value"),
        d.quote_ident(MARKER_TABLE),
        d.quote_ident("name"),
        d.quote_string(name)
    );
    let rows = ops.query(&sql).await?;
    Ok(rows.get_string(0, "value"))
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SqliteConnection;
    use crate::retry::ResilientExecutor;
    use std::sync::Arc;

    async fn ops() -> SchemaOperations {
        let conn = SqliteConnection::in_memory().await.unwrap();
        SchemaOperations::new(Arc::new(conn), ResilientExecutor::default())
    }

    #[test]
    fn test_bookkeeping_names() {
        assert!(is_bookkeeping_table("_schemaport_history"));
        assert!(is_bookkeeping_table("_SCHEMAPORT_markers"));
        assert!(!is_bookkeeping_table("users"));
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let ops = ops().await;
        assert!(load_history(&ops).await.unwrap().is_empty());

        record_applied(&ops, 20240101, "create users").await.unwrap();
        record_applied(&ops, 20240102, "it's indexed").await.unwrap();
        record_applied(&ops, 20240101, "create users again").await.unwrap();

        let history = load_history(&ops).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, 20240101);
        assert_eq!(history[0].description, "create users again");
        assert_eq!(history[1].description, "it's indexed");

        forget(&ops, 20240102).await.unwrap();
        assert_eq!(load_history(&ops).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_markers() {
        let ops = ops().await;
        assert_eq!(get_marker(&ops, "tenant_consolidation:tasks").await.unwrap(), None);
        set_marker(&ops, "tenant_consolidation:tasks", "acme").await.unwrap();
        set_marker(&ops, "tenant_consolidation:tasks", "globex").await.unwrap();
        assert_eq!(
            get_marker(&ops, "tenant_consolidation:tasks").await.unwrap().as_deref(),
            Some("globex")
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
