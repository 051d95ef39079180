//! # schemaport
//!
//! Cross-database schema and data portability for SQLite, MySQL/MariaDB and
//! PostgreSQL.
//!
//! This library provides:
//!
//! - **Dialect profiles** describing each engine's literal forms and limits
//! - **Value conversion** from in-memory values to dialect-correct literals
//! - **Idempotent DDL** that is safe to re-run after a partial failure
//! - **Versioned migrations** with recreate-and-restore for engines that
//!   cannot alter constrained tables in place
//! - **Dumps** of schema and data for any target engine, and their import
//! - **Retry** of transient connection failures with exponential backoff
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use schemaport::{
//!     drivers, Config, DatabaseKind, DumpEngine, DumpOptions, ResilientExecutor,
//!     SchemaOperations,
//! };
//!
//! #[tokio::main]
//! async fn main() -> schemaport::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let conn = drivers::connect(&config.database).await?;
//!     let ops = SchemaOperations::new(conn, ResilientExecutor::new(config.retry.policy()));
//!
//!     let script = DumpEngine::new(&ops)
//!         .generate(DatabaseKind::Postgres, &DumpOptions::from(&config.dump))
//!         .await?;
//!     script.write("dump.sql")?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod convert;
pub mod core;
pub mod drivers;
pub mod dump;
pub mod error;
pub mod migration;
pub mod retry;
pub mod schema_ops;
pub mod typemap;
pub mod verify;

// Re-exports for convenient access
pub use crate::core::{
    Column, ColumnTypeInfo, Connection, DatabaseKind, DefaultValue, Dialect, ForeignKey, Index,
    LogicalType, Rows, SqlValue, Table,
};
pub use config::{Config, DatabaseConfig, DumpConfig, RetryConfig, TenantConfig};
pub use drivers::DialectImpl;
pub use dump::{DumpEngine, DumpOptions, DumpScript, FragmentKind};
pub use error::{PortError, Result};
pub use migration::{Catalog, MigrationStep, Migrator};
pub use retry::{ResilientExecutor, RetryPolicy};
pub use schema_ops::{DdlOutcome, SchemaOperations};
pub use verify::{VerifyOptions, VerifyResult};
