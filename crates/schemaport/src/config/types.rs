//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::DatabaseKind;
use crate::error::Result;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database to operate on.
    pub database: DatabaseConfig,

    /// Dump behavior.
    #[serde(default)]
    pub dump: DumpConfig,

    /// Retry policy for transient connection failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Multi-tenant retrofit settings.
    #[serde(default)]
    pub tenant: Option<TenantConfig>,
}

/// Database connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Engine selector: sqlite, mysql or postgres (aliases accepted).
    pub r#type: String,

    /// Database file for SQLite (`:memory:` for an in-memory database).
    #[serde(default)]
    pub path: Option<String>,

    /// Database host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port (default: engine default).
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("type", &self.r#type)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl DatabaseConfig {
    /// SQLite configuration for a database file.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            r#type: "sqlite".into(),
            path: Some(path.into()),
            host: default_host(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            ssl_mode: default_disable(),
        }
    }

    /// Parsed engine kind.
    pub fn kind(&self) -> Result<DatabaseKind> {
        DatabaseKind::parse(&self.r#type)
    }

    /// Configured port or the engine default.
    pub fn port_or_default(&self) -> u16 {
        self.port
            .or_else(|| self.kind().ok().and_then(|k| k.default_port()))
            .unwrap_or(0)
    }
}

/// Dump behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Rows per INSERT statement (default: 500).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Emit CREATE TABLE / CREATE INDEX statements (default: true).
    #[serde(default = "default_true")]
    pub include_ddl: bool,

    /// Emit INSERT statements (default: true).
    #[serde(default = "default_true")]
    pub include_data: bool,

    /// Emit upserts keyed on the primary key instead of plain INSERTs (default: false).
    #[serde(default)]
    pub upsert: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            include_ddl: true,
            include_data: true,
            upsert: false,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 5).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Multi-tenant retrofit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Tenant column added to retrofitted tables (default: "tenant_id").
    #[serde(default = "default_tenant_column")]
    pub column: String,

    /// Tenant assigned to pre-existing rows (default: "default").
    #[serde(default = "default_tenant_id")]
    pub default_id: String,

    /// Table listing known tenants, consulted for ambiguity.
    #[serde(default)]
    pub registry_table: Option<String>,

    /// Id column of the registry table (default: "id").
    #[serde(default = "default_registry_column")]
    pub registry_column: String,

    /// Explicit consolidation target when the registry holds several tenants.
    #[serde(default)]
    pub consolidate_to: Option<String>,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            column: default_tenant_column(),
            default_id: default_tenant_id(),
            registry_table: None,
            registry_column: default_registry_column(),
            consolidate_to: None,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    500
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_tenant_column() -> String {
    "tenant_id".to_string()
}

fn default_tenant_id() -> String {
    "default".to_string()
}

fn default_registry_column() -> String {
    "id".to_string()
}
