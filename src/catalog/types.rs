//! Data types and column definitions for schema descriptions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// SQL-like data types supported by DriftDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Text/string data (VARCHAR in SQL).
    Text,
    /// Integer numbers (BIGINT in SQL).
    Integer,
    /// Floating point numbers (DOUBLE in SQL).
    Float,
    /// Boolean values.
    Boolean,
    /// JSON objects or arrays.
    Json,
    /// Timestamps (stored as ISO 8601 strings).
    Timestamp,
}

impl DataType {
    /// Check if a JSON value matches this data type.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (DataType::Text, Value::String(_)) => true,
            (DataType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (DataType::Float, Value::Number(_)) => true,
            (DataType::Boolean, Value::Bool(_)) => true,
            (DataType::Json, Value::Object(_) | Value::Array(_)) => true,
            (DataType::Timestamp, Value::String(s)) => {
                // Basic ISO 8601 check
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
            }
            _ => false,
        }
    }

    /// Get the SQL name for this type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            DataType::Text => "TEXT",
            DataType::Integer => "INTEGER",
            DataType::Float => "REAL",
            DataType::Boolean => "BOOLEAN",
            DataType::Json => "JSON",
            DataType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

/// Full column definition including name, type, and nullability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Data type.
    pub data_type: DataType,
    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl ColumnDef {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    /// Render the column as a SQL fragment.
    pub fn to_sql(&self) -> String {
        if self.nullable {
            format!("`{}` {}", self.name, self.data_type.sql_name())
        } else {
            format!("`{}` {} NOT NULL", self.name, self.data_type.sql_name())
        }
    }
}

/// A foreign key reference carried on a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing column in this table.
    pub column: String,
    /// Referenced table.
    pub parent_table: String,
    /// Referenced column in the parent table.
    pub parent_column: String,
}

impl ForeignKey {
    /// Render the foreign key as a SQL fragment.
    pub fn to_sql(&self) -> String {
        format!(
            "FOREIGN KEY (`{}`) REFERENCES `{}` (`{}`)",
            self.column, self.parent_table, self.parent_column
        )
    }
}
