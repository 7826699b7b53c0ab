//! In-memory dataset: named, positionally aligned columns.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};

use crate::error::SyncError;
use crate::value::Value;

/// One named column of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// An ordered set of equally long, uniquely named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    num_rows: usize,
}

impl Dataset {
    /// Build a dataset, rejecting duplicate names and ragged columns.
    pub fn new(columns: Vec<Column>) -> Result<Self, SyncError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SyncError::Validation(format!(
                    "duplicate column '{}' in dataset",
                    column.name
                )));
            }
        }

        let num_rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        if let Some(ragged) = columns.iter().find(|c| c.values.len() != num_rows) {
            return Err(SyncError::Validation(format!(
                "column '{}' has {} values, expected {}",
                ragged.name,
                ragged.values.len(),
                num_rows
            )));
        }

        Ok(Self { columns, num_rows })
    }

    /// Build a dataset from JSON objects. Columns appear in first-seen key
    /// order; a key absent from a record is `Null` in that row.
    pub fn from_json_records(records: &[JsonValue]) -> Result<Self, SyncError> {
        let objects: Vec<&Map<String, JsonValue>> = records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                record.as_object().ok_or_else(|| {
                    SyncError::Validation(format!("record {} is not a JSON object", i))
                })
            })
            .collect::<Result<_, _>>()?;

        let mut names: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for object in &objects {
            for key in object.keys() {
                if seen.insert(key.clone()) {
                    names.push(key.clone());
                }
            }
        }

        let columns = names
            .into_iter()
            .map(|name| {
                let values = objects
                    .iter()
                    .map(|object| object.get(&name).cloned().map(Value::from).unwrap_or(Value::Null))
                    .collect();
                Column::new(name, values)
            })
            .collect();

        Self::new(columns)
    }

    /// Parse RFC 3339 text in the named columns into timestamps.
    pub fn with_timestamp_columns(mut self, names: &[String]) -> Result<Self, SyncError> {
        for name in names {
            let column = self
                .columns
                .iter_mut()
                .find(|c| &c.name == name)
                .ok_or_else(|| {
                    SyncError::Validation(format!("unknown timestamp column '{}'", name))
                })?;
            for value in column.values.iter_mut() {
                if let Value::Text(text) = value {
                    let parsed = DateTime::parse_from_rfc3339(text).map_err(|e| {
                        SyncError::Validation(format!(
                            "column '{}': '{}' is not an RFC 3339 timestamp: {}",
                            name, text, e
                        ))
                    })?;
                    *value = Value::Timestamp(parsed.with_timezone(&Utc));
                }
            }
        }
        Ok(self)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        (index < self.num_rows).then_some(Row {
            dataset: self,
            index,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        (0..self.num_rows).map(move |index| Row {
            dataset: self,
            index,
        })
    }
}

/// Borrowed view of one dataset row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.dataset.column(column).map(|c| &c.values[self.index])
    }

    /// `(column, value)` pairs in dataset column order.
    pub fn cells(&self) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        let index = self.index;
        self.dataset
            .columns
            .iter()
            .map(move |c| (c.name.as_str(), &c.values[index]))
    }
}
