//! SQLite session backed by sqlx.

use std::borrow::Cow;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Column as _, Connection as _, Row, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::{Connection, DatabaseKind, Rows, SqlValue};
use crate::error::{PortError, Result};

/// A single SQLite session.
pub struct SqliteConnection {
    session: Mutex<Option<sqlx::SqliteConnection>>,
}

impl SqliteConnection {
    /// Open a database file (created if missing) or `:memory:`.
    ///
    /// Foreign key enforcement is switched on, matching how applications run.
    pub async fn open(path: &str) -> Result<Self> {
        let url = match path {
            ":memory:" => "sqlite::memory:".to_string(),
            p if p.starts_with("sqlite:") => p.to_string(),
            p => format!("sqlite://{}", p),
        };

        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let session = sqlx::SqliteConnection::connect_with(&options).await?;
        debug!("Opened SQLite database {}", path);

        Ok(Self::from_session(session))
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::open(":memory:").await
    }

    /// Wrap an existing sqlx session.
    pub fn from_session(session: sqlx::SqliteConnection) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

fn closed() -> PortError {
    PortError::Database {
        code: None,
        message: "SQLite connection closed".into(),
    }
}

/// Convert one column of a row into a value, using the stored type of the value.
fn decode_value(row: &SqliteRow, idx: usize) -> Result<SqlValue<'static>> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }

    let storage = raw.type_info().name().to_uppercase();
    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" | "INT" => SqlValue::Int(row.try_get_unchecked::<i64, _>(idx)?),
        "REAL" | "NUMERIC" => SqlValue::Float(row.try_get_unchecked::<f64, _>(idx)?),
        "BLOB" => SqlValue::Bytes(Cow::Owned(row.try_get_unchecked::<Vec<u8>, _>(idx)?)),
        _ => SqlValue::Text(Cow::Owned(row.try_get_unchecked::<String, _>(idx)?)),
    };
    Ok(value)
}

#[async_trait]
impl Connection for SqliteConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(closed)?;
        let result = sqlx::Executor::execute(&mut *session, sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str) -> Result<Rows> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(closed)?;
        let fetched: Vec<SqliteRow> = sqlx::query(sql).fetch_all(&mut *session).await?;

        let columns = fetched
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut rows = Vec::with_capacity(fetched.len());
        for row in &fetched {
            let values = (0..row.len())
                .map(|idx| decode_value(row, idx))
                .collect::<Result<Vec<_>>>()?;
            rows.push(values);
        }

        Ok(Rows::new(columns, rows))
    }

    async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            if let Err(e) = session.close().await {
                debug!("Error closing SQLite session: {}", e);
            }
        }
    }
}
