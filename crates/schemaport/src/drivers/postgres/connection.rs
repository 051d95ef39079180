//! PostgreSQL session backed by tokio-postgres.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::core::{Connection, DatabaseKind, Rows, SqlValue};
use crate::drivers::{SslMode, TlsBuilder};
use crate::error::Result;
use crate::retry::is_transient;

/// A single PostgreSQL session.
///
/// The client is created on first use and recreated after a transient
/// failure, so retries run against a fresh session.
pub struct PostgresConnection {
    config: tokio_postgres::Config,
    ssl_mode: SslMode,
    session: Mutex<Option<Client>>,
}

impl PostgresConnection {
    /// Connect using a database configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port_or_default())
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password)
            .application_name("schemaport");

        let conn = Self {
            config: pg_config,
            ssl_mode,
            session: Mutex::new(None),
        };

        // Fail fast on bad credentials or an unreachable host.
        conn.execute("SELECT 1").await?;
        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host,
            config.port_or_default(),
            config.database
        );

        Ok(conn)
    }

    async fn open_client(&self) -> Result<Client> {
        match TlsBuilder::new(self.ssl_mode).build()? {
            Some(tls) => {
                let (client, connection) = self.config.connect(tls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection error: {}", e);
                    }
                });
                Ok(client)
            }
            None => {
                let (client, connection) = self.config.connect(NoTls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection error: {}", e);
                    }
                });
                Ok(client)
            }
        }
    }

    async fn session(&self) -> Result<MutexGuard<'_, Option<Client>>> {
        let mut guard = self.session.lock().await;
        if guard.as_ref().map_or(true, Client::is_closed) {
            debug!("Opening PostgreSQL session");
            *guard = Some(self.open_client().await?);
        }
        Ok(guard)
    }

    fn discard_on_transient<T>(guard: &mut Option<Client>, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if is_transient(e) {
                debug!("Discarding PostgreSQL session after transient error: {}", e);
                guard.take();
            }
        }
        result
    }
}

/// Types decoded natively; anything else is read through the text protocol.
fn is_native(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::NUMERIC
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
            | Type::BYTEA
            | Type::UUID
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::DATE
            | Type::TIME
            | Type::JSON
            | Type::JSONB
            | Type::BOOL_ARRAY
            | Type::INT2_ARRAY
            | Type::INT4_ARRAY
            | Type::INT8_ARRAY
            | Type::FLOAT4_ARRAY
            | Type::FLOAT8_ARRAY
            | Type::TEXT_ARRAY
            | Type::VARCHAR_ARRAY
            | Type::UUID_ARRAY
    )
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> Result<Option<T>> {
    Ok(row.try_get::<_, Option<T>>(idx)?)
}

fn array<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, f: F) -> Result<SqlValue<'static>>
where
    T: FromSql<'a>,
    F: Fn(T) -> SqlValue<'static>,
{
    Ok(get::<Vec<Option<T>>>(row, idx)?.map_or(SqlValue::Null, |items| {
        SqlValue::Array(
            items
                .into_iter()
                .map(|item| item.map_or(SqlValue::Null, &f))
                .collect(),
        )
    }))
}

fn decode_value(row: &tokio_postgres::Row, idx: usize) -> Result<SqlValue<'static>> {
    let ty = row.columns()[idx].type_().clone();
    let value = match ty {
        Type::BOOL => get::<bool>(row, idx)?.map(SqlValue::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| SqlValue::Int(i64::from(v))),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| SqlValue::Int(i64::from(v))),
        Type::INT8 => get::<i64>(row, idx)?.map(SqlValue::Int),
        Type::OID => get::<u32>(row, idx)?.map(|v| SqlValue::Int(i64::from(v))),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| SqlValue::Float(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(SqlValue::Float),
        Type::NUMERIC => get::<Decimal>(row, idx)?.map(SqlValue::Decimal),
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(|b| SqlValue::Bytes(Cow::Owned(b))),
        Type::UUID => get::<Uuid>(row, idx)?.map(SqlValue::Uuid),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(SqlValue::DateTime),
        Type::TIMESTAMPTZ => {
            get::<DateTime<FixedOffset>>(row, idx)?.map(SqlValue::DateTimeOffset)
        }
        Type::DATE => get::<NaiveDate>(row, idx)?.map(SqlValue::Date),
        Type::TIME => get::<NaiveTime>(row, idx)?.map(SqlValue::Time),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(SqlValue::Json),
        Type::BOOL_ARRAY => return array::<bool, _>(row, idx, SqlValue::Bool),
        Type::INT2_ARRAY => return array::<i16, _>(row, idx, |v| SqlValue::Int(i64::from(v))),
        Type::INT4_ARRAY => return array::<i32, _>(row, idx, |v| SqlValue::Int(i64::from(v))),
        Type::INT8_ARRAY => return array::<i64, _>(row, idx, SqlValue::Int),
        Type::FLOAT4_ARRAY => {
            return array::<f32, _>(row, idx, |v| SqlValue::Float(f64::from(v)))
        }
        Type::FLOAT8_ARRAY => return array::<f64, _>(row, idx, SqlValue::Float),
        Type::UUID_ARRAY => return array::<Uuid, _>(row, idx, SqlValue::Uuid),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            return array::<String, _>(row, idx, SqlValue::text_owned)
        }
        _ => get::<String>(row, idx)?.map(SqlValue::text_owned),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

async fn run_query(client: &Client, sql: &str) -> Result<Rows> {
    let stmt = client.prepare(sql).await?;
    let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

    if !stmt.columns().iter().all(|c| is_native(c.type_())) {
        return run_text_query(client, sql, columns).await;
    }

    let fetched = client.query(&stmt, &[]).await?;
    let mut rows = Vec::with_capacity(fetched.len());
    for row in &fetched {
        let values = (0..row.len())
            .map(|idx| decode_value(row, idx))
            .collect::<Result<Vec<_>>>()?;
        rows.push(values);
    }
    Ok(Rows::new(columns, rows))
}

/// Read a result through the simple query protocol, where every value is text.
async fn run_text_query(client: &Client, sql: &str, columns: Vec<String>) -> Result<Rows> {
    let messages = client.simple_query(sql).await?;
    let rows = messages
        .iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(
                (0..row.len())
                    .map(|idx| {
                        row.get(idx)
                            .map_or(SqlValue::Null, |s| SqlValue::text_owned(s.to_string()))
                    })
                    .collect(),
            ),
            _ => None,
        })
        .collect();
    Ok(Rows::new(columns, rows))
}

#[async_trait]
impl Connection for PostgresConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut guard = self.session().await?;
        let result = match guard.as_ref() {
            Some(client) => client.execute(sql, &[]).await.map_err(Into::into),
            None => Ok(0),
        };
        Self::discard_on_transient(&mut guard, result)
    }

    async fn query(&self, sql: &str) -> Result<Rows> {
        let mut guard = self.session().await?;
        let result = match guard.as_ref() {
            Some(client) => run_query(client, sql).await,
            None => Ok(Rows::default()),
        };
        Self::discard_on_transient(&mut guard, result)
    }

    async fn close(&self) {
        // Dropping the client ends the connection task.
        if self.session.lock().await.take().is_some() {
            debug!("Closed PostgreSQL session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_types() {
        assert!(is_native(&Type::INT8));
        assert!(is_native(&Type::JSONB));
        assert!(is_native(&Type::TEXT_ARRAY));
        assert!(!is_native(&Type::INTERVAL));
        assert!(!is_native(&Type::INET));
    }
}
