//! Remote column types and their inference from dataset samples.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::value::Value;

/// Reserved column holding the server time of the last write to a row.
pub const SYNCED_AT: &str = "_synced_at";

/// Column types the engine creates and binds parameters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Float,
    Bool,
    Timestamp,
    String,
}

/// Inferred type per dataset column.
pub type ColumnTypes = HashMap<String, ColumnType>;

impl ColumnType {
    /// Name used in table schemas.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Bool => "BOOL",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::String => "STRING",
        }
    }

    /// Standard-SQL name used in DDL and query parameters.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INT64",
            ColumnType::Float => "FLOAT64",
            ColumnType::Bool => "BOOL",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::String => "STRING",
        }
    }

    /// Map a remote type name onto one of the five kinds, if it is one.
    pub fn from_remote(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT64" => Some(ColumnType::Integer),
            "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => Some(ColumnType::Float),
            "BOOL" | "BOOLEAN" => Some(ColumnType::Bool),
            "TIMESTAMP" => Some(ColumnType::Timestamp),
            "STRING" => Some(ColumnType::String),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infer the remote type of a column from its values.
///
/// `_synced_at` is always TIMESTAMP. Otherwise the non-null values must share
/// one kind: all integers give INTEGER, numbers with at least one float give
/// FLOAT, all booleans BOOL, all timestamps TIMESTAMP. Text, structured
/// values, mixed kinds and all-null columns give STRING.
pub fn infer_type(column_name: &str, sample: &[Value]) -> ColumnType {
    if column_name == SYNCED_AT {
        return ColumnType::Timestamp;
    }

    let mut kind: Option<ColumnType> = None;
    for value in sample {
        let next = match value {
            Value::Null => continue,
            Value::Float(f) if f.is_nan() => continue,
            Value::Bool(_) => ColumnType::Bool,
            Value::Int(_) => ColumnType::Integer,
            Value::Float(_) => ColumnType::Float,
            Value::Timestamp(_) => ColumnType::Timestamp,
            Value::Text(_) | Value::Json(_) => return ColumnType::String,
        };
        kind = match (kind, next) {
            (None, next) => Some(next),
            (Some(current), next) if current == next => Some(current),
            (Some(ColumnType::Integer), ColumnType::Float)
            | (Some(ColumnType::Float), ColumnType::Integer) => Some(ColumnType::Float),
            _ => return ColumnType::String,
        };
    }

    kind.unwrap_or(ColumnType::String)
}

/// Infer every column of `dataset`. Computed once per sync call.
pub fn infer_column_types(dataset: &Dataset) -> ColumnTypes {
    dataset
        .columns()
        .iter()
        .map(|column| (column.name.clone(), infer_type(&column.name, &column.values)))
        .collect()
}
