//! Error types for the portability engine.
//!
//! Driver errors are normalized at the driver boundary into [`PortError::Database`]
//! (vendor code + message) or [`PortError::Io`] (OS-level connection failures) so that
//! transient-failure classification and idempotency checks live in one place.

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Main error type for schema, migration and dump operations.
#[derive(Error, Debug)]
pub enum PortError {
    /// Configuration error (invalid YAML, missing fields, bad values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unsupported database engine name.
    #[error("Unknown database type: '{0}'. Supported types: sqlite, mysql, postgres")]
    UnknownDialect(String),

    /// Error reported by the database engine or its driver.
    #[error("Database error{}: {message}", code_suffix(.code))]
    Database {
        /// Vendor code (SQLSTATE, MySQL error number, SQLite extended code).
        code: Option<String>,
        message: String,
    },

    /// OS-level I/O error (socket, file).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Existing data or schema contradicts what a migration requires.
    #[error("Invariant violated on table {table}: {message}")]
    InvariantViolation { table: String, message: String },

    /// Column cannot be added in place on this engine.
    #[error(
        "Column {column} cannot be added to {table} in place; recreate the table with the new definition first"
    )]
    RequiresRecreate { table: String, column: String },

    /// Tenant retrofit found several tenants and no explicit consolidation decision.
    #[error(
        "Table {table} cannot be assigned a single tenant: {} tenants already exist ({}); record an explicit consolidation decision",
        .tenants.len(),
        .tenants.join(", ")
    )]
    TenantAmbiguity { table: String, tenants: Vec<String> },

    /// A migration step failed.
    #[error("Migration step {step_id} failed{}: {source}", restore_note(.restore_in_progress))]
    Migration {
        step_id: i64,
        /// True once table data has been dropped but not yet fully restored.
        restore_in_progress: bool,
        #[source]
        source: Box<PortError>,
    },

    /// Transient failures persisted past the retry budget.
    #[error("Database unreachable after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<PortError>,
    },
}

fn code_suffix(code: &Option<String>) -> String {
    match code {
        Some(c) => format!(" [{}]", c),
        None => String::new(),
    }
}

fn restore_note(restore_in_progress: &bool) -> &'static str {
    if *restore_in_progress {
        " while a table restore was in progress (rows were dropped and may not have been fully restored)"
    } else {
        ""
    }
}

/// Vendor codes meaning "object already exists".
const ALREADY_EXISTS_CODES: &[&str] = &[
    // PostgreSQL: duplicate_table, duplicate_object, duplicate_column, duplicate_schema
    "42P07", "42710", "42701", "42P06",
    // MySQL: ER_TABLE_EXISTS_ERROR, ER_DUP_FIELDNAME, ER_DUP_KEYNAME
    "1050", "1060", "1061",
];

/// Vendor codes meaning "object does not exist".
const MISSING_OBJECT_CODES: &[&str] = &[
    // PostgreSQL: undefined_table, undefined_object, undefined_column
    "42P01", "42704", "42703",
    // MySQL: ER_BAD_TABLE_ERROR, ER_CANT_DROP_FIELD_OR_KEY, ER_NO_SUCH_TABLE
    "1051", "1091", "1146",
];

impl PortError {
    /// Create a Database error without a vendor code.
    pub fn database(message: impl Into<String>) -> Self {
        PortError::Database {
            code: None,
            message: message.into(),
        }
    }

    /// Create an InvariantViolation error.
    pub fn invariant(table: impl Into<String>, message: impl Into<String>) -> Self {
        PortError::InvariantViolation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Vendor code, if the engine reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            PortError::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// True when the engine rejected a create because the object already exists.
    pub fn is_already_exists(&self) -> bool {
        let PortError::Database { code, message } = self else {
            return false;
        };
        if let Some(code) = code {
            if ALREADY_EXISTS_CODES.contains(&code.as_str()) {
                return true;
            }
        }
        let lower = message.to_lowercase();
        lower.contains("already exists") || lower.contains("duplicate column name")
    }

    /// True when the engine rejected a drop because the object does not exist.
    pub fn is_missing_object(&self) -> bool {
        let PortError::Database { code, message } = self else {
            return false;
        };
        if let Some(code) = code {
            if MISSING_OBJECT_CODES.contains(&code.as_str()) {
                return true;
            }
        }
        let lower = message.to_lowercase();
        lower.contains("no such table")
            || lower.contains("no such index")
            || lower.contains("no such view")
            || lower.contains("does not exist")
            || lower.contains("unknown table")
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = StdError::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            PortError::Config(_) | PortError::UnknownDialect(_) | PortError::Yaml(_) => 2,
            PortError::RetriesExhausted { .. } => 3,
            PortError::Migration { .. } => 4,
            PortError::InvariantViolation { .. }
            | PortError::RequiresRecreate { .. }
            | PortError::TenantAmbiguity { .. } => 5,
            _ => 1,
        }
    }
}

/// Find the first `io::Error` in an error's source chain.
fn io_kind_in_chain(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}

impl From<sqlx::Error> for PortError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => PortError::Database {
                code: db.code().map(|c| c.into_owned()),
                message: db.message().to_string(),
            },
            sqlx::Error::Io(io_err) => PortError::Io(io_err),
            other => match io_kind_in_chain(&other) {
                Some(kind) => PortError::Io(io::Error::new(kind, other.to_string())),
                None => PortError::database(other.to_string()),
            },
        }
    }
}

impl From<mysql_async::Error> for PortError {
    fn from(err: mysql_async::Error) -> Self {
        match err {
            mysql_async::Error::Server(server) => PortError::Database {
                code: Some(server.code.to_string()),
                message: server.message,
            },
            other => match io_kind_in_chain(&other) {
                Some(kind) => PortError::Io(io::Error::new(kind, other.to_string())),
                None => PortError::database(other.to_string()),
            },
        }
    }
}

impl From<tokio_postgres::Error> for PortError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            return PortError::Database {
                code: Some(db.code().code().to_string()),
                message: db.message().to_string(),
            };
        }
        if let Some(kind) = io_kind_in_chain(&err) {
            return PortError::Io(io::Error::new(kind, err.to_string()));
        }
        // connection_failure when the client has lost its session
        let code = err.is_closed().then(|| "08006".to_string());
        PortError::Database {
            code,
            message: err.to_string(),
        }
    }
}

/// Result type alias for portability operations.
pub type Result<T> = std::result::Result<T, PortError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn db(code: Option<&str>, message: &str) -> PortError {
        PortError::Database {
            code: code.map(str::to_string),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_already_exists_by_code_and_message() {
        assert!(db(Some("42P07"), "relation \"users\" already exists").is_already_exists());
        assert!(db(Some("1061"), "Duplicate key name 'idx_a'").is_already_exists());
        assert!(db(None, "index idx_a already exists").is_already_exists());
        assert!(db(None, "duplicate column name: email").is_already_exists());
        assert!(!db(Some("23505"), "duplicate key value violates unique constraint")
            .is_already_exists());
    }

    #[test]
    fn test_missing_object_by_code_and_message() {
        assert!(db(Some("42P01"), "table \"gone\" does not exist").is_missing_object());
        assert!(db(Some("1091"), "Can't DROP 'idx'; check that column/key exists")
            .is_missing_object());
        assert!(db(None, "no such index: idx_gone").is_missing_object());
        assert!(!db(Some("42601"), "syntax error at or near \"DROP\"").is_missing_object());
        assert!(!PortError::Config("x".into()).is_missing_object());
    }

    #[test]
    fn test_migration_error_mentions_restore_window() {
        let err = PortError::Migration {
            step_id: 20240101,
            restore_in_progress: true,
            source: Box::new(db(None, "disk full")),
        };
        let text = err.to_string();
        assert!(text.contains("20240101"));
        assert!(text.contains("restore was in progress"));

        let err = PortError::Migration {
            step_id: 7,
            restore_in_progress: false,
            source: Box::new(db(None, "boom")),
        };
        assert!(!err.to_string().contains("restore"));
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let err = PortError::RetriesExhausted {
            attempts: 6,
            source: Box::new(PortError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "refused",
            ))),
        };
        let detailed = err.format_detailed();
        assert!(detailed.contains("after 6 attempts"));
        assert!(detailed.contains("Caused by"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_tenant_ambiguity_lists_tenants() {
        let err = PortError::TenantAmbiguity {
            table: "tasks".into(),
            tenants: vec!["acme".into(), "globex".into()],
        };
        let text = err.to_string();
        assert!(text.contains("2 tenants"));
        assert!(text.contains("acme, globex"));
    }
}
