//! SQLite driver.
//!
//! - [`SqliteDialect`]: SQL syntax strategy
//! - [`SqliteConnection`]: single-session connection over sqlx
//! - [`SqliteCatalog`]: schema introspection
//!
//! # Connection String
//!
//! A file path, `:memory:`, or a sqlx URL such as `sqlite://app.db?mode=rwc`.

mod catalog;
mod connection;
mod dialect;

pub use catalog::SqliteCatalog;
pub use connection::SqliteConnection;
pub use dialect::SqliteDialect;
