//! Schema and metadata types for tables, columns, indexes, and constraints.
//!
//! These types are dialect-neutral: a [`Table`] read from SQLite can be rendered
//! as MySQL or PostgreSQL DDL through the type map.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::SqlValue;

/// Logical column type driving value conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    Boolean,
    Integer,
    Float,
    Text,
    Timestamp,
    Binary,
    Json,
    Array,
    Enum,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::Boolean => "boolean",
            LogicalType::Integer => "integer",
            LogicalType::Float => "float",
            LogicalType::Text => "text",
            LogicalType::Timestamp => "timestamp",
            LogicalType::Binary => "binary",
            LogicalType::Json => "json",
            LogicalType::Array => "array",
            LogicalType::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// Column type information consumed by the value converter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTypeInfo {
    /// Column name.
    pub name: String,

    /// Logical type.
    pub logical_type: LogicalType,

    /// Column is a native array type (PostgreSQL `text[]` etc.), not JSON text.
    #[serde(default)]
    pub native_array: bool,
}

impl ColumnTypeInfo {
    /// Create type info for a non-array column.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            native_array: false,
        }
    }
}

/// Column default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Engine expression such as `CURRENT_TIMESTAMP`, emitted verbatim.
    Expression(String),
}

impl DefaultValue {
    /// Value inserted for rows that predate the column, if the default is a constant.
    pub fn to_value(&self) -> Option<SqlValue<'static>> {
        match self {
            DefaultValue::Null => Some(SqlValue::Null),
            DefaultValue::Bool(b) => Some(SqlValue::Bool(*b)),
            DefaultValue::Int(v) => Some(SqlValue::Int(*v)),
            DefaultValue::Float(v) => Some(SqlValue::Float(*v)),
            DefaultValue::Text(s) => Some(SqlValue::text_owned(s.clone())),
            DefaultValue::Expression(_) => None,
        }
    }

    /// True for `CURRENT_TIMESTAMP`-style expressions.
    pub fn is_current_timestamp(&self) -> bool {
        match self {
            DefaultValue::Expression(e) => {
                let upper = e.to_uppercase();
                upper.starts_with("CURRENT_TIMESTAMP") || upper.starts_with("NOW(")
            }
            _ => false,
        }
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<Column>,

    /// Primary key column names in key order.
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<Index>,

    /// Foreign key constraints.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Create an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Add a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key.
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a secondary index.
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a foreign key.
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Look up a column by name (case-insensitive).
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Column names in ordinal order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Type info for every column, in ordinal order.
    pub fn column_types(&self) -> Vec<ColumnTypeInfo> {
        self.columns.iter().map(Column::type_info).collect()
    }

    /// The single auto-increment key column, if the table has one.
    pub fn auto_increment_column(&self) -> Option<&Column> {
        if self.primary_key.len() != 1 {
            return None;
        }
        self.find_column(&self.primary_key[0])
            .filter(|c| c.auto_increment && c.logical_type == LogicalType::Integer)
    }

    /// Names of tables this table references (self-references excluded).
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .foreign_keys
            .iter()
            .map(|fk| fk.ref_table.as_str())
            .filter(|t| !t.eq_ignore_ascii_case(&self.name))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Logical type.
    pub logical_type: LogicalType,

    /// Declared type as reported by the source engine (e.g. "varchar(100)").
    #[serde(default)]
    pub declared_type: String,

    /// Maximum length for text/binary columns.
    #[serde(default)]
    pub max_length: Option<u32>,

    /// Whether the column allows NULL.
    #[serde(default = "default_true")]
    pub is_nullable: bool,

    /// Default value.
    #[serde(default)]
    pub default: Option<DefaultValue>,

    /// Auto-increment / serial / rowid-alias column.
    #[serde(default)]
    pub auto_increment: bool,

    /// Native array column.
    #[serde(default)]
    pub native_array: bool,

    /// Allowed values for enum columns.
    #[serde(default)]
    pub enum_values: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Column {
    /// Create a nullable column with no default.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            declared_type: String::new(),
            max_length: None,
            is_nullable: true,
            default: None,
            auto_increment: false,
            native_array: false,
            enum_values: Vec::new(),
        }
    }

    /// Mark NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Set the default value.
    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Set a maximum length.
    pub fn max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Mark as auto-increment.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Mark as native array.
    pub fn native_array(mut self) -> Self {
        self.native_array = true;
        self
    }

    /// Set enum variants.
    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Type info for value conversion.
    pub fn type_info(&self) -> ColumnTypeInfo {
        ColumnTypeInfo {
            name: self.name.clone(),
            logical_type: self.logical_type,
            native_array: self.native_array,
        }
    }
}

/// One key part of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    /// Column name.
    pub name: String,

    /// Descending key order.
    #[serde(default)]
    pub desc: bool,
}

impl IndexColumn {
    /// Ascending key part.
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: false,
        }
    }

    /// Descending key part.
    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: true,
        }
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Key parts in order.
    pub columns: Vec<IndexColumn>,

    /// Whether the index is unique.
    #[serde(default)]
    pub is_unique: bool,
}

impl Index {
    /// Non-unique index over ascending columns.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(IndexColumn::asc).collect(),
            is_unique: false,
        }
    }

    /// Mark unique.
    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    /// Column names in key order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name (may be empty on engines that do not name FKs).
    #[serde(default)]
    pub name: String,

    /// Referencing column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    /// ON DELETE action.
    #[serde(default = "default_action")]
    pub on_delete: String,

    /// ON UPDATE action.
    #[serde(default = "default_action")]
    pub on_update: String,
}

fn default_action() -> String {
    "NO ACTION".to_string()
}

impl ForeignKey {
    /// Foreign key with NO ACTION semantics.
    pub fn new<I, S>(columns: I, ref_table: impl Into<String>, ref_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: String::new(),
            columns: columns.into_iter().map(Into::into).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.into_iter().map(Into::into).collect(),
            on_delete: default_action(),
            on_update: default_action(),
        }
    }

    /// Set the ON DELETE action.
    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = action.into();
        self
    }
}

/// Normalize a referential action to its SQL keyword form.
pub fn referential_action(action: &str) -> &'static str {
    match action.trim().to_uppercase().replace('_', " ").as_str() {
        "CASCADE" => "CASCADE",
        "SET NULL" => "SET NULL",
        "SET DEFAULT" => "SET DEFAULT",
        "RESTRICT" => "RESTRICT",
        _ => "NO ACTION",
    }
}
