//! MySQL/MariaDB database driver.
//!
//! This module provides MySQL-specific implementations for:
//! - [`MysqlDialect`]: SQL syntax strategy
//! - [`MysqlConnection`]: single-session connection over mysql_async
//! - [`MysqlCatalog`]: `INFORMATION_SCHEMA` introspection
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod catalog;
mod connection;
mod dialect;

pub use catalog::MysqlCatalog;
pub use connection::MysqlConnection;
pub use dialect::MysqlDialect;
