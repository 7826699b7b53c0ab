//! Change planning: partition dataset rows into inserts and sparse updates.

use std::collections::HashMap;
use std::fmt;

use crate::compare::values_equal;
use crate::dataset::{Dataset, Row};
use crate::types::SYNCED_AT;
use crate::value::{Record, Value};

/// A row scheduled for writing: `(column, value)` pairs in dataset column
/// order. `_synced_at` is never included; the writer sets it server-side.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRow {
    pub cells: Vec<(String, Value)>,
}

impl PlannedRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }
}

/// Planned writes. Both lists keep dataset row order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Full rows for reference values absent from the table.
    pub to_insert: Vec<PlannedRow>,
    /// Changed columns followed by the reference column.
    pub to_update: Vec<PlannedRow>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty()
    }
}

/// Index existing records by the text form of their reference value. The
/// first record wins when the table holds duplicates.
fn index_existing<'a>(existing: &'a [Record], reference_column: &str) -> HashMap<String, &'a Record> {
    let mut index = HashMap::with_capacity(existing.len());
    for record in existing {
        if let Some(key) = record.get(reference_column).and_then(Value::to_text) {
            index.entry(key).or_insert(record);
        }
    }
    index
}

fn changed_columns<'a>(
    row: Row<'a>,
    existing: &Record,
    reference_column: &str,
) -> Vec<(&'a str, &'a Value)> {
    row.cells()
        .filter(|(column, _)| *column != reference_column && *column != SYNCED_AT)
        .filter(|(column, new)| match existing.get(*column) {
            Some(old) => !values_equal(old, new),
            None => true,
        })
        .collect()
}

/// Compare `dataset` against the `existing` rows fetched from the table.
///
/// Pure: the same inputs always produce the same change set. A row whose
/// reference value is null never matches and is planned as an insert.
pub fn plan(dataset: &Dataset, existing: &[Record], reference_column: &str) -> ChangeSet {
    let index = index_existing(existing, reference_column);
    let mut changes = ChangeSet::default();

    for row in dataset.rows() {
        let matched = row
            .get(reference_column)
            .and_then(Value::to_text)
            .and_then(|key| index.get(&key));

        match matched {
            None => {
                let cells = row
                    .cells()
                    .filter(|(column, _)| *column != SYNCED_AT)
                    .map(|(column, value)| (column.to_string(), value.clone()))
                    .collect();
                changes.to_insert.push(PlannedRow { cells });
            }
            Some(record) => {
                let changed = changed_columns(row, record, reference_column);
                if changed.is_empty() {
                    continue;
                }
                let mut cells: Vec<(String, Value)> = changed
                    .into_iter()
                    .map(|(column, value)| (column.to_string(), value.clone()))
                    .collect();
                let reference = row.get(reference_column).cloned().unwrap_or(Value::Null);
                cells.push((reference_column.to_string(), reference));
                changes.to_update.push(PlannedRow { cells });
            }
        }
    }

    changes
}

/// One differing column of a planned update.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub reference: Value,
    pub column: String,
    pub existing: Value,
    pub new: Value,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} -> {}",
            self.reference, self.column, self.existing, self.new
        )
    }
}

/// Explain planned updates column by column. Columns absent from the stored
/// row report `Null` as the existing value.
pub fn mismatches(existing: &[Record], reference_column: &str, updates: &[PlannedRow]) -> Vec<Mismatch> {
    let index = index_existing(existing, reference_column);
    let mut out = Vec::new();

    for update in updates {
        let Some(reference) = update.get(reference_column) else {
            continue;
        };
        let Some(record) = reference.to_text().and_then(|key| index.get(&key)) else {
            continue;
        };
        for (column, new) in &update.cells {
            if column == reference_column || column == SYNCED_AT {
                continue;
            }
            let old = record.get(column).cloned().unwrap_or(Value::Null);
            if !values_equal(&old, new) || !record.contains_key(column) {
                out.push(Mismatch {
                    reference: reference.clone(),
                    column: column.clone(),
                    existing: old,
                    new: new.clone(),
                });
            }
        }
    }

    out
}
