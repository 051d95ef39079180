//! MySQL/MariaDB session backed by mysql_async.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Row, Value};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::core::{Connection, DatabaseKind, Rows, SqlValue};
use crate::drivers::SslMode;
use crate::error::Result;
use crate::retry::is_transient;

/// Character set number MySQL reports for binary strings.
const BINARY_CHARSET: u16 = 63;

/// A single MySQL session.
///
/// The session is opened on first use. A transient failure discards it so the
/// next call (typically a retry) reconnects instead of reusing a dead socket.
pub struct MysqlConnection {
    opts: Opts,
    session: Mutex<Option<Conn>>,
}

impl MysqlConnection {
    /// Connect using a database configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        if !ssl_mode.requires_tls() {
            warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
        }

        let builder = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port_or_default())
            .db_name(Some(config.database.clone()))
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"])
            .ssl_opts(ssl_mode.mysql_ssl_opts());

        let conn = Self {
            opts: builder.into(),
            session: Mutex::new(None),
        };

        // Fail fast on bad credentials or an unreachable host.
        conn.execute("SELECT 1").await?;
        info!(
            "Connected to MySQL: {}:{}/{}",
            config.host,
            config.port_or_default(),
            config.database
        );

        Ok(conn)
    }

    async fn session(&self) -> Result<MutexGuard<'_, Option<Conn>>> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            debug!("Opening MySQL session");
            *guard = Some(Conn::new(self.opts.clone()).await?);
        }
        Ok(guard)
    }

    /// Drop the cached session after a transient failure.
    fn discard_on_transient<T>(guard: &mut Option<Conn>, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if is_transient(e) {
                debug!("Discarding MySQL session after transient error: {}", e);
                guard.take();
            }
        }
        result
    }
}

async fn run_query(conn: &mut Conn, sql: &str) -> Result<Rows> {
    let mut result = conn.query_iter(sql).await?;
    let columns = result.columns();
    let rows: Vec<Row> = result.collect::<Row>().await?;
    drop(result);

    let meta: Vec<(String, ColumnType, u16)> = columns
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|c| {
            (
                c.name_str().into_owned(),
                c.column_type(),
                c.character_set(),
            )
        })
        .collect();

    let values = rows
        .iter()
        .map(|row| {
            meta.iter()
                .enumerate()
                .map(|(idx, (_, ty, charset))| {
                    row.as_ref(idx)
                        .map_or(SqlValue::Null, |v| decode_value(v, *ty, *charset))
                })
                .collect()
        })
        .collect();

    Ok(Rows::new(
        meta.into_iter().map(|(name, _, _)| name).collect(),
        values,
    ))
}

/// Convert a text-protocol value into a [`SqlValue`] guided by the column type.
fn decode_value(value: &Value, ty: ColumnType, charset: u16) -> SqlValue<'static> {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(v) => SqlValue::Int(*v),
        Value::UInt(v) => i64::try_from(*v)
            .map(SqlValue::Int)
            .unwrap_or_else(|_| SqlValue::Decimal(Decimal::from(*v))),
        Value::Float(v) => SqlValue::Float(f64::from(*v)),
        Value::Double(v) => SqlValue::Float(*v),
        Value::Date(y, m, d, h, mi, s, us) => {
            NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*m), u32::from(*d))
                .and_then(|date| {
                    date.and_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us)
                })
                .map_or(SqlValue::Null, SqlValue::DateTime)
        }
        Value::Time(neg, days, h, mi, s, us) => {
            let sign = if *neg { "-" } else { "" };
            let hours = u64::from(*days) * 24 + u64::from(*h);
            SqlValue::text_owned(format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, mi, s, us))
        }
        Value::Bytes(bytes) => decode_bytes(bytes, ty, charset),
    }
}

fn decode_bytes(bytes: &[u8], ty: ColumnType, charset: u16) -> SqlValue<'static> {
    let text = || String::from_utf8_lossy(bytes).into_owned();
    match ty {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => match text().parse::<i64>() {
            Ok(v) => SqlValue::Int(v),
            Err(_) => text()
                .parse::<Decimal>()
                .map_or_else(|_| SqlValue::text_owned(text()), SqlValue::Decimal),
        },
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => text()
            .parse::<f64>()
            .map_or_else(|_| SqlValue::text_owned(text()), SqlValue::Float),
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => text()
            .parse::<Decimal>()
            .map_or_else(|_| SqlValue::text_owned(text()), SqlValue::Decimal),
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            NaiveDateTime::parse_from_str(&text(), "%Y-%m-%d %H:%M:%S%.f")
                .map_or_else(|_| SqlValue::text_owned(text()), SqlValue::DateTime)
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            NaiveDate::parse_from_str(&text(), "%Y-%m-%d")
                .map_or_else(|_| SqlValue::text_owned(text()), SqlValue::Date)
        }
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
            NaiveTime::parse_from_str(&text(), "%H:%M:%S%.f")
                .map_or_else(|_| SqlValue::text_owned(text()), SqlValue::Time)
        }
        ColumnType::MYSQL_TYPE_JSON => serde_json::from_slice(bytes)
            .map_or_else(|_| SqlValue::text_owned(text()), SqlValue::Json),
        ColumnType::MYSQL_TYPE_BIT => {
            // BIT(n) arrives as big-endian bytes
            let v = bytes.iter().fold(0i64, |acc, b| (acc << 8) | i64::from(*b));
            SqlValue::Int(v)
        }
        _ if charset == BINARY_CHARSET => SqlValue::Bytes(Cow::Owned(bytes.to_vec())),
        _ => SqlValue::text_owned(text()),
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Mysql
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut guard = self.session().await?;
        let result = match guard.as_mut() {
            Some(conn) => match conn.query_drop(sql).await {
                Ok(()) => Ok(conn.affected_rows()),
                Err(e) => Err(e.into()),
            },
            None => Ok(0),
        };
        Self::discard_on_transient(&mut guard, result)
    }

    async fn query(&self, sql: &str) -> Result<Rows> {
        let mut guard = self.session().await?;
        let result = match guard.as_mut() {
            Some(conn) => run_query(conn, sql).await,
            None => Ok(Rows::default()),
        };
        Self::discard_on_transient(&mut guard, result)
    }

    async fn close(&self) {
        if let Some(conn) = self.session.lock().await.take() {
            if let Err(e) = conn.disconnect().await {
                debug!("Error closing MySQL session: {}", e);
            }
        }
    }
}
