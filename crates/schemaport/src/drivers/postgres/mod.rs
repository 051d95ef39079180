//! PostgreSQL driver.
//!
//! This module provides PostgreSQL-specific implementations:
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PostgresConnection`]: single-session connection over tokio-postgres
//! - [`PostgresCatalog`]: `information_schema` / `pg_catalog` introspection

mod catalog;
mod connection;
mod dialect;

pub use catalog::PostgresCatalog;
pub use connection::PostgresConnection;
pub use dialect::PostgresDialect;
