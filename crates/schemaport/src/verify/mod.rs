//! Post-import verification.
//!
//! Compares a source and a target database table by table:
//!
//! - **Row counts** must be equal.
//! - **Foreign key counts** must be equal.
//! - **Values** (optional) are compared row by row in primary key order for
//!   tables keyed on integer columns. Each value is reduced to a canonical form
//!   for its logical type first, so `1` in SQLite and `TRUE` in PostgreSQL
//!   compare equal.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::convert::{as_bool, timestamp, to_json};
use crate::core::{LogicalType, SqlValue, Table};
use crate::error::Result;
use crate::migration::history::is_bookkeeping_table;
use crate::schema_ops::SchemaOperations;

/// Rows fetched per side and page during value comparison.
const VALUE_PAGE_ROWS: usize = 1000;

/// Verification settings.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Also compare row values, not only counts.
    pub compare_values: bool,
}

/// Outcome for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableVerifyResult {
    pub table_name: String,
    pub source_row_count: i64,
    /// `None` when the table is missing from the target.
    pub target_row_count: Option<i64>,
    pub source_foreign_keys: usize,
    pub target_foreign_keys: usize,
    /// Rows whose values were compared.
    pub rows_compared: usize,
    pub value_mismatches: usize,
    /// Primary key of the first mismatching row.
    pub first_mismatch: Option<String>,
}

impl TableVerifyResult {
    pub fn is_match(&self) -> bool {
        self.target_row_count == Some(self.source_row_count)
            && self.source_foreign_keys == self.target_foreign_keys
            && self.value_mismatches == 0
    }
}

/// Outcome for every compared table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub tables: Vec<TableVerifyResult>,
}

impl VerifyResult {
    pub fn is_match(&self) -> bool {
        self.tables.iter().all(TableVerifyResult::is_match)
    }

    /// Names of the tables that differ.
    pub fn mismatched(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| !t.is_match())
            .map(|t| t.table_name.as_str())
            .collect()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Compare row and foreign key counts of `tables` (all source tables when empty).
pub async fn compare(
    source: &SchemaOperations,
    target: &SchemaOperations,
    tables: &[String],
) -> Result<VerifyResult> {
    compare_with(source, target, tables, &VerifyOptions::default()).await
}

/// [`compare`] with explicit options.
pub async fn compare_with(
    source: &SchemaOperations,
    target: &SchemaOperations,
    tables: &[String],
    options: &VerifyOptions,
) -> Result<VerifyResult> {
    let names = if tables.is_empty() {
        source
            .list_tables()
            .await?
            .into_iter()
            .filter(|t| !is_bookkeeping_table(t))
            .collect()
    } else {
        tables.to_vec()
    };

    let mut result = VerifyResult::default();
    for name in &names {
        let table = source.load_table(name).await?;
        let outcome = verify_table(source, target, &table, options).await?;

        if outcome.is_match() {
            info!("{}: {} rows (match)", name, outcome.source_row_count);
        } else {
            warn!(
                "{}: source={} target={} fks={}/{} value mismatches={} (MISMATCH)",
                name,
                outcome.source_row_count,
                outcome
                    .target_row_count
                    .map_or_else(|| "missing".to_string(), |c| c.to_string()),
                outcome.source_foreign_keys,
                outcome.target_foreign_keys,
                outcome.value_mismatches
            );
        }
        result.tables.push(outcome);
    }
    Ok(result)
}

async fn verify_table(
    source: &SchemaOperations,
    target: &SchemaOperations,
    table: &Table,
    options: &VerifyOptions,
) -> Result<TableVerifyResult> {
    let mut outcome = TableVerifyResult {
        table_name: table.name.clone(),
        source_row_count: source.row_count(&table.name).await?,
        target_row_count: None,
        source_foreign_keys: table.foreign_keys.len(),
        target_foreign_keys: 0,
        rows_compared: 0,
        value_mismatches: 0,
        first_mismatch: None,
    };

    if !target.has_table(&table.name).await? {
        return Ok(outcome);
    }
    let target_table = target.load_table(&table.name).await?;
    outcome.target_row_count = Some(target.row_count(&table.name).await?);
    outcome.target_foreign_keys = target_table.foreign_keys.len();

    if options.compare_values && outcome.target_row_count == Some(outcome.source_row_count) {
        if integer_keyed(table) {
            compare_values(source, target, table, &mut outcome).await?;
        } else {
            debug!("{}: no integer primary key, values not compared", table.name);
        }
    }
    Ok(outcome)
}

/// Text keys sort differently across engines; integer keys do not.
fn integer_keyed(table: &Table) -> bool {
    table.has_pk()
        && table.primary_key.iter().all(|k| {
            table
                .find_column(k)
                .is_some_and(|c| c.logical_type == LogicalType::Integer)
        })
}

async fn compare_values(
    source: &SchemaOperations,
    target: &SchemaOperations,
    table: &Table,
    outcome: &mut TableVerifyResult,
) -> Result<()> {
    let mut offset = 0usize;
    loop {
        let left = source
            .read_rows(&table.name, &table.primary_key, Some(VALUE_PAGE_ROWS), Some(offset))
            .await?;
        let right = target
            .read_rows(&table.name, &table.primary_key, Some(VALUE_PAGE_ROWS), Some(offset))
            .await?;
        if left.is_empty() {
            break;
        }

        for (i, left_row) in left.rows.iter().enumerate() {
            outcome.rows_compared += 1;
            let same = table.columns.iter().all(|column| {
                let l = left.get(i, &column.name).map(|v| canonical(v, column.logical_type));
                let r = right.get(i, &column.name).map(|v| canonical(v, column.logical_type));
                l == r
            });
            if !same {
                outcome.value_mismatches += 1;
                if outcome.first_mismatch.is_none() {
                    let key: Vec<String> = table
                        .primary_key
                        .iter()
                        .filter_map(|k| left.column_index(k))
                        .map(|idx| to_json(&left_row[idx]).to_string())
                        .collect();
                    outcome.first_mismatch = Some(format!("({})", key.join(", ")));
                }
            }
        }

        if left.len() < VALUE_PAGE_ROWS {
            break;
        }
        offset += VALUE_PAGE_ROWS;
    }
    Ok(())
}

/// Engine-independent form of a value of logical type `ty`.
fn canonical(value: &SqlValue<'_>, ty: LogicalType) -> serde_json::Value {
    use serde_json::Value as J;
    if value.is_null() {
        return J::Null;
    }
    let typed = match ty {
        LogicalType::Boolean => as_bool(value).map(J::Bool),
        LogicalType::Integer => value.as_i64().map(J::from),
        LogicalType::Float => match to_json(value) {
            J::Number(n) => n.as_f64().map(J::from),
            J::String(s) => s.trim().parse::<f64>().ok().map(J::from),
            _ => None,
        },
        LogicalType::Timestamp => timestamp::normalize(value).map(J::String),
        LogicalType::Binary => match value {
            SqlValue::Bytes(b) => Some(J::String(hex::encode(b.as_ref()))),
            SqlValue::Text(s) => Some(J::String(hex::encode(s.as_bytes()))),
            _ => None,
        },
        LogicalType::Text | LogicalType::Enum => match value {
            SqlValue::Text(s) => Some(J::String(s.to_string())),
            SqlValue::Bytes(b) => std::str::from_utf8(b).ok().map(|s| J::String(s.to_string())),
            _ => None,
        },
        LogicalType::Json | LogicalType::Array => None,
    };
    typed.unwrap_or_else(|| to_json(value))
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

    async fn seed(ops: &SchemaOperations, rows: &str) {
        ops.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, active BOOLEAN)")
            .await
            .unwrap();
        ops.execute(&format!("INSERT INTO users (id, name, active) VALUES {}", rows))
            .await
            .unwrap();
    }

    #[test]
    fn test_canonical_forms() {
        assert_eq!(
            canonical(&SqlValue::Int(1), LogicalType::Boolean),
            canonical(&SqlValue::Bool(true), LogicalType::Boolean)
        );
        assert_eq!(
            canonical(&SqlValue::from("2024-01-02T03:04:05Z"), LogicalType::Timestamp),
            canonical(&SqlValue::from("2024-01-02 03:04:05"), LogicalType::Timestamp)
        );
        assert_eq!(
            canonical(&SqlValue::from("{\"a\": 1}"), LogicalType::Json),
            canonical(&SqlValue::from("{\"a\":1}"), LogicalType::Json)
        );
        assert_ne!(
            canonical(&SqlValue::from("1"), LogicalType::Text),
            canonical(&SqlValue::Int(1), LogicalType::Text)
        );
    }

    #[tokio::test]
    async fn test_matching_databases() {
        let (a, b) = (ops().await, ops().await);
        seed(&a, "(1, 'ann', 1), (2, 'bob', 0)").await;
        seed(&b, "(1, 'ann', 1), (2, 'bob', 0)").await;

        let options = VerifyOptions { compare_values: true };
        let result = compare_with(&a, &b, &[], &options).await.unwrap();
        assert!(result.is_match());
        assert_eq!(result.tables[0].rows_compared, 2);
    }

    #[tokio::test]
    async fn test_detects_differences() {
        let (a, b) = (ops().await, ops().await);
        seed(&a, "(1, 'ann', 1), (2, 'bob', 0)").await;
        seed(&b, "(1, 'ann', 1), (2, 'bob', 1)").await;

        let counts_only = compare(&a, &b, &[]).await.unwrap();
        assert!(counts_only.is_match());

        let options = VerifyOptions { compare_values: true };
        let result = compare_with(&a, &b, &[], &options).await.unwrap();
        assert_eq!(result.mismatched(), vec!["users"]);
        assert_eq!(result.tables[0].first_mismatch.as_deref(), Some("(2)"));
    }

    #[tokio::test]
    async fn test_missing_target_table() {
        let (a, b) = (ops().await, ops().await);
        seed(&a, "(1, 'ann', 1)").await;
        let result = compare(&a, &b, &["users".to_string()]).await.unwrap();
        assert!(!result.is_match());
        assert_eq!(result.tables[0].target_row_count, None);
        assert!(result.to_json().unwrap().contains("\"target_row_count\": null"));
    }
}
