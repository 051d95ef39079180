//! Core abstractions shared by every engine.
//!
//! - [`schema`]: Table, column, index and foreign key metadata
//! - [`value`]: In-memory values and result sets
//! - [`traits`]: Connection, dialect and schema reader traits
//! - [`catalog`]: Engine identifiers
//! - [`identifier`]: Identifier validation and quoting
//!
//! # Architecture
//!
//! The core module defines engine-agnostic abstractions that are implemented
//! by driver modules (`drivers/sqlite`, `drivers/mysql`, `drivers/postgres`).
//! Higher layers (schema operations, migrations, dumps) only talk to these traits.

pub mod catalog;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use catalog::DatabaseKind;
pub use schema::{
    Column, ColumnTypeInfo, DefaultValue, ForeignKey, Index, IndexColumn, LogicalType, Table,
};
pub use traits::{Connection, Dialect, SchemaReader, SelectQueryOptions};
pub use value::{Rows, SqlValue};
