//! Bounded exponential-backoff retry for transient connection failures.
//!
//! [`classify`] is the single place that decides whether an error is worth
//! retrying. [`ResilientExecutor::run`] retries transient failures with delays of
//! `base * 2^(retry-1)` and gives up after `max_retries` retries. Every `run` call
//! owns its own [`RetryState`]; nothing carries over between calls.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::core::{Connection, DatabaseKind, Rows};
use crate::error::{PortError, Result};

/// PostgreSQL SQLSTATEs meaning the session is gone or the server is going away.
const PG_TRANSIENT_STATES: &[&str] = &[
    "08000", "08001", "08003", "08004", "08006", "57P01", "57P02", "57P03",
];

/// MySQL client/server error numbers for lost or refused connections.
const MYSQL_TRANSIENT_CODES: &[&str] = &["2002", "2003", "2005", "2006", "2013", "2055"];

/// OS error names that show up verbatim in driver messages.
const TRANSIENT_ERRNO_NAMES: &[&str] = &[
    "econnrefused",
    "econnreset",
    "econnaborted",
    "etimedout",
    "enotfound",
    "eai_again",
    "epipe",
    "ehostunreach",
    "enetunreach",
];

/// Message fragments indicating the server closed or lost the connection.
const TRANSIENT_MESSAGES: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection aborted",
    "connection closed",
    "connection terminated",
    "connection timed out",
    "server has gone away",
    "lost connection",
    "broken pipe",
    "timed out",
    "unexpected eof",
    "host not found",
    "name or service not known",
    "failed to lookup address",
    "temporary failure in name resolution",
    "terminating connection",
    "the database system is starting up",
    "the database system is shutting down",
];

/// Error class for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to resolve given time; retried.
    Transient,
    /// Bad data, bad syntax, validation failure; never retried.
    Permanent,
}

/// Classify an error.
pub fn classify(err: &PortError) -> ErrorClass {
    match err {
        PortError::Io(io_err) => {
            if is_transient_io_kind(io_err.kind()) || is_transient_message(&io_err.to_string()) {
                ErrorClass::Transient
            } else {
                ErrorClass::Permanent
            }
        }
        PortError::Database { code, message } => {
            let by_code = code.as_deref().is_some_and(|c| {
                PG_TRANSIENT_STATES.contains(&c) || MYSQL_TRANSIENT_CODES.contains(&c)
            });
            if by_code || is_transient_message(message) {
                ErrorClass::Transient
            } else {
                ErrorClass::Permanent
            }
        }
        _ => ErrorClass::Permanent,
    }
}

/// Shorthand for `classify(err) == ErrorClass::Transient`.
pub fn is_transient(err: &PortError) -> bool {
    classify(err) == ErrorClass::Transient
}

fn is_transient_io_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::AddrNotAvailable
    )
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_ERRNO_NAMES.iter().any(|n| lower.contains(n))
        || TRANSIENT_MESSAGES.iter().any(|m| lower.contains(m))
}

/// Retry budget and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 1000)
    }
}

/// What happens once the retry budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Exhaustion {
    /// Library context: return [`PortError::RetriesExhausted`].
    #[default]
    ReturnError,
    /// Process context: log and terminate the process with this exit code.
    ExitProcess(i32),
}

/// Per-call retry bookkeeping.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Retries performed so far.
    pub attempt: u32,
    /// Most recent failure.
    pub last_error: Option<PortError>,
}

/// Retry outcome details for one `run` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Retries performed.
    pub retries: u32,
    /// Delays waited, in order.
    pub delays: Vec<Duration>,
}

/// Wraps database operations with transient-failure retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResilientExecutor {
    policy: RetryPolicy,
    exhaustion: Exhaustion,
}

impl ResilientExecutor {
    /// Executor returning an error on exhaustion.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            exhaustion: Exhaustion::ReturnError,
        }
    }

    /// Terminate the process with `code` instead of returning once retries run out.
    pub fn exit_on_exhaustion(mut self, code: i32) -> Self {
        self.exhaustion = Exhaustion::ExitProcess(code);
        self
    }

    /// Retry policy in use.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `op`, retrying transient failures.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_report(op).await.0
    }

    /// Run `op`, also reporting the retries performed.
    pub async fn run_with_report<T, F, Fut>(&self, mut op: F) -> (Result<T>, RetryReport)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = RetryState::default();
        let mut report = RetryReport::default();

        loop {
            let err = match op().await {
                Ok(value) => {
                    if state.attempt > 0 {
                        debug!("Operation succeeded after {} retries", state.attempt);
                    }
                    return (Ok(value), report);
                }
                Err(err) => err,
            };

            if classify(&err) == ErrorClass::Permanent {
                return (Err(err), report);
            }

            if state.attempt >= self.policy.max_retries {
                let attempts = state.attempt + 1;
                return (Err(self.exhausted(attempts, err)), report);
            }

            state.attempt += 1;
            let delay = self.policy.delay_for(state.attempt);
            warn!(
                "Transient database error (retry {}/{} in {:?}): {}",
                state.attempt, self.policy.max_retries, delay, err
            );
            state.last_error = Some(err);
            report.retries = state.attempt;
            report.delays.push(delay);
            tokio::time::sleep(delay).await;
        }
    }

    fn exhausted(&self, attempts: u32, err: PortError) -> PortError {
        let err = PortError::RetriesExhausted {
            attempts,
            source: Box::new(err),
        };
        match self.exhaustion {
            Exhaustion::ReturnError => {
                error!("{}", err);
                err
            }
            Exhaustion::ExitProcess(code) => {
                error!("{}; database requires external intervention, exiting", err);
                std::process::exit(code)
            }
        }
    }
}

/// A [`Connection`] whose every call goes through a [`ResilientExecutor`].
///
/// Drivers drop their session after a transient failure, so a retry may run
/// on a fresh one. Pinned statements are replayed before every retry to carry
/// session settings, such as disabled foreign key checks, across reconnects.
pub struct ResilientConnection {
    inner: Arc<dyn Connection>,
    executor: ResilientExecutor,
    pinned: RwLock<Vec<String>>,
}

impl ResilientConnection {
    /// Wrap a connection.
    pub fn new(inner: Arc<dyn Connection>, executor: ResilientExecutor) -> Self {
        Self {
            inner,
            executor,
            pinned: RwLock::new(Vec::new()),
        }
    }

    /// Executor used for retries.
    pub fn executor(&self) -> &ResilientExecutor {
        &self.executor
    }

    /// Replay `sql` before every retry until it is unpinned.
    pub fn pin(&self, sql: impl Into<String>) {
        let sql = sql.into();
        let mut pinned = self.pinned.write().unwrap_or_else(PoisonError::into_inner);
        if !pinned.contains(&sql) {
            pinned.push(sql);
        }
    }

    pub fn unpin(&self, sql: &str) {
        self.pinned
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| s != sql);
    }

    /// Statements currently replayed before a retry.
    pub fn pinned(&self) -> Vec<String> {
        self.pinned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `sql` exactly once.
    ///
    /// For statements that must not be repeated: after a lost connection
    /// there is no telling whether the server applied them.
    pub async fn execute_once(&self, sql: &str) -> Result<u64> {
        self.inner.execute(sql).await
    }

    async fn replay_pinned(&self) -> Result<()> {
        for sql in self.pinned() {
            debug!("Replaying session statement: {}", sql);
            self.inner.execute(&sql).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for ResilientConnection {
    fn kind(&self) -> DatabaseKind {
        self.inner.kind()
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let attempts = &AtomicU32::new(0);
        self.executor
            .run(|| async move {
                if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                    self.replay_pinned().await?;
                }
                self.inner.execute(sql).await
            })
            .await
    }

    async fn query(&self, sql: &str) -> Result<Rows> {
        let attempts = &AtomicU32::new(0);
        self.executor
            .run(|| async move {
                if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                    self.replay_pinned().await?;
                }
                self.inner.query(sql).await
            })
            .await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn refused() -> PortError {
        PortError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
    }

    fn syntax() -> PortError {
        PortError::Database {
            code: Some("42601".into()),
            message: "syntax error at or near \"SELEC\"".into(),
        }
    }

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    #[test]
    fn test_classify_io_kinds() {
        assert_eq!(classify(&refused()), ErrorClass::Transient);
        let reset = PortError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "x"));
        assert!(is_transient(&reset));
        let missing = PortError::Io(io::Error::new(io::ErrorKind::NotFound, "no file"));
        assert!(!is_transient(&missing));
    }

    #[test]
    fn test_classify_vendor_codes() {
        for code in ["08006", "57P01", "2006", "2013", "2003"] {
            let err = PortError::Database {
                code: Some(code.into()),
                message: "whatever".into(),
            };
            assert!(is_transient(&err), "code {} should be transient", code);
        }
        let unique = PortError::Database {
            code: Some("23505".into()),
            message: "duplicate key value violates unique constraint".into(),
        };
        assert!(!is_transient(&unique));
        assert!(!is_transient(&syntax()));
    }

    #[test]
    fn test_classify_messages() {
        for msg in [
            "connect ECONNREFUSED 127.0.0.1:3306",
            "getaddrinfo ENOTFOUND db.internal",
            "MySQL server has gone away",
            "Lost connection to MySQL server during query",
            "Connection terminated unexpectedly",
            "server closed the connection unexpectedly; connection closed",
        ] {
            assert!(is_transient(&PortError::database(msg)), "{}", msg);
        }
        assert!(!is_transient(&PortError::database("NOT NULL constraint failed: t.a")));
        assert!(!is_transient(&PortError::Config("connection refused".into())));
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=5).map(|n| policy.delay_for(n)).collect();
        assert_eq!(delays, ms(&[1000, 2000, 4000, 8000, 16000]));
        assert_eq!(policy.max_attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_k_transient_failures_then_success() {
        let executor = ResilientExecutor::new(RetryPolicy::default());
        for k in 0..=5u32 {
            let calls = &AtomicU32::new(0);
            let start = Instant::now();
            let (result, report) = executor
                .run_with_report(|| async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < k {
                        Err(refused())
                    } else {
                        Ok(n)
                    }
                })
                .await;
            assert_eq!(result.unwrap(), k);
            assert_eq!(report.retries, k);
            let expected = ms(&[1000, 2000, 4000, 8000, 16000][..k as usize]);
            assert_eq!(report.delays, expected);
            assert_eq!(start.elapsed(), expected.iter().sum::<Duration>());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_five_retries() {
        let executor = ResilientExecutor::new(RetryPolicy::default());
        let calls = &AtomicU32::new(0);
        let (result, report) = executor
            .run_with_report(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(refused())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(report.retries, 5);
        match result.unwrap_err() {
            PortError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 6);
                assert!(matches!(*source, PortError::Io(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let executor = ResilientExecutor::new(RetryPolicy::default());
        let calls = &AtomicU32::new(0);
        let (result, report) = executor
            .run_with_report(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(syntax())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.retries, 0);
        assert!(report.delays.is_empty());
        assert_eq!(result.unwrap_err().code(), Some("42601"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_do_not_carry_over_between_calls() {
        let executor = ResilientExecutor::new(RetryPolicy::default());

        let calls = &AtomicU32::new(0);
        let (_, first) = executor
            .run_with_report(|| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 4 {
                    Err(refused())
                } else {
                    Ok(())
                }
            })
            .await;
        assert_eq!(first.retries, 4);

        // A fresh call gets the full budget and starts from the 1s delay again.
        let calls = &AtomicU32::new(0);
        let (result, second) = executor
            .run_with_report(|| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 5 {
                    Err(refused())
                } else {
                    Ok(())
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(second.retries, 5);
        assert_eq!(second.delays[0], Duration::from_millis(1000));
    }
}
