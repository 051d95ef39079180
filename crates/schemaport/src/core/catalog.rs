//! Engine identifiers.
//!
//! [`DatabaseKind`] is the single place where user-supplied engine names are
//! normalized. Everything else (dialect lookup, driver selection, dump tagging)
//! keys off the enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PortError, Result};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Sqlite,
    Mysql,
    Postgres,
}

impl DatabaseKind {
    /// All supported engines.
    pub const ALL: [DatabaseKind; 3] = [
        DatabaseKind::Sqlite,
        DatabaseKind::Mysql,
        DatabaseKind::Postgres,
    ];

    /// Parse an engine name, accepting the common aliases.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::UnknownDialect`] for anything else.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DatabaseKind::Sqlite),
            "mysql" | "mariadb" => Ok(DatabaseKind::Mysql),
            "postgres" | "postgresql" | "pg" => Ok(DatabaseKind::Postgres),
            other => Err(PortError::UnknownDialect(other.to_string())),
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Sqlite => "sqlite",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Postgres => "postgres",
        }
    }

    /// Default TCP port for server engines.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            DatabaseKind::Sqlite => None,
            DatabaseKind::Mysql => Some(3306),
            DatabaseKind::Postgres => Some(5432),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
