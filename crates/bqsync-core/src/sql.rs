//! Statement builders for the three write/read shapes the engine issues,
//! plus per-column parameter coercion.

use chrono::{DateTime, Utc};

use crate::planner::PlannedRow;
use crate::schema::TableId;
use crate::store::Statement;
use crate::types::{ColumnType, ColumnTypes, SYNCED_AT};
use crate::value::Value;

/// Ceiling on bound parameters in one statement.
pub const MAX_QUERY_PARAMETERS: usize = 10_000;

/// Hard cap on rows per multi-row insert.
pub const MAX_ROWS_PER_INSERT: usize = 500;

/// Server-evaluated expression written to `_synced_at`.
pub const NOW: &str = "CURRENT_TIMESTAMP()";

pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "\\`"))
}

pub fn table_ref(table: &TableId) -> String {
    quote_ident(&table.qualified())
}

/// Rows per insert batch so that `rows * num_columns` stays within the
/// parameter ceiling. Never below one row.
pub fn insert_batch_size(num_columns: usize) -> usize {
    if num_columns == 0 {
        return MAX_ROWS_PER_INSERT;
    }
    (MAX_QUERY_PARAMETERS / num_columns).clamp(1, MAX_ROWS_PER_INSERT)
}

/// `SELECT * FROM t WHERE ref IN UNNEST(@ref_ids)`
pub fn fetch_existing(
    table: &TableId,
    reference_column: &str,
    reference_type: ColumnType,
    ref_ids: Vec<Value>,
) -> Statement {
    let sql = format!(
        "SELECT * FROM {} WHERE {} IN UNNEST(@ref_ids)",
        table_ref(table),
        quote_ident(reference_column)
    );
    let ids = ref_ids
        .iter()
        .map(|v| coerce_param(v, reference_type))
        .collect();
    Statement::new(sql).with_array("ref_ids", reference_type, ids)
}

/// One multi-row insert. Parameters are named `r{row}_c{col}` with `row`
/// counted from `first_row` so names stay unique across batches.
pub fn insert_batch(
    table: &TableId,
    columns: &[String],
    rows: &[PlannedRow],
    types: &ColumnTypes,
    first_row: usize,
) -> Statement {
    let column_list: Vec<String> = columns
        .iter()
        .map(|c| quote_ident(c))
        .chain(std::iter::once(quote_ident(SYNCED_AT)))
        .collect();

    let mut statement = Statement::default();
    let mut tuples = Vec::with_capacity(rows.len());
    for (offset, row) in rows.iter().enumerate() {
        let r = first_row + offset;
        let mut placeholders = Vec::with_capacity(columns.len() + 1);
        for (c, column) in columns.iter().enumerate() {
            let name = format!("r{}_c{}", r, c);
            placeholders.push(format!("@{}", name));
            let ty = column_type(types, column);
            let value = row.get(column).cloned().unwrap_or(Value::Null);
            statement = statement.with_scalar(name, ty, coerce_param(&value, ty));
        }
        placeholders.push(NOW.to_string());
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    statement.sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table_ref(table),
        column_list.join(", "),
        tuples.join(", ")
    );
    statement
}

/// `UPDATE t SET c0 = @c0, ..., _synced_at = NOW WHERE ref = @ref`.
/// Every cell of `row` other than the reference column is assigned.
pub fn update_row(
    table: &TableId,
    reference_column: &str,
    row: &PlannedRow,
    types: &ColumnTypes,
) -> Statement {
    let mut statement = Statement::default();
    let mut assignments = Vec::new();
    let mut c = 0;
    for (column, value) in &row.cells {
        if column == reference_column || column == SYNCED_AT {
            continue;
        }
        let name = format!("c{}", c);
        c += 1;
        assignments.push(format!("{} = @{}", quote_ident(column), name));
        let ty = column_type(types, column);
        statement = statement.with_scalar(name, ty, coerce_param(value, ty));
    }
    assignments.push(format!("{} = {}", quote_ident(SYNCED_AT), NOW));

    let ref_type = column_type(types, reference_column);
    let ref_value = row.get(reference_column).cloned().unwrap_or(Value::Null);
    statement = statement.with_scalar("ref", ref_type, coerce_param(&ref_value, ref_type));

    statement.sql = format!(
        "UPDATE {} SET {} WHERE {} = @ref",
        table_ref(table),
        assignments.join(", "),
        quote_ident(reference_column)
    );
    statement
}

fn column_type(types: &ColumnTypes, column: &str) -> ColumnType {
    types.get(column).copied().unwrap_or(ColumnType::String)
}

/// Convert `value` into the representation bound for a column of type `ty`.
///
/// Values that cannot be converted are passed through unchanged and left
/// for the remote store to accept or reject.
pub fn coerce_param(value: &Value, ty: ColumnType) -> Value {
    match (ty, value) {
        (_, Value::Null) => Value::Null,
        (_, Value::Float(f)) if f.is_nan() => Value::Null,

        (ColumnType::String, Value::Text(_)) => value.clone(),
        (ColumnType::String, other) => other.to_text().map(Value::Text).unwrap_or(Value::Null),

        (ColumnType::Bool, Value::Bool(_)) => value.clone(),
        (ColumnType::Bool, Value::Text(s)) => match s.to_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value.clone(),
        },
        (ColumnType::Bool, Value::Int(i)) => Value::Bool(*i != 0),
        (ColumnType::Bool, Value::Float(f)) => Value::Bool(*f != 0.0),

        (ColumnType::Float, Value::Int(i)) => Value::Float(*i as f64),
        (ColumnType::Integer, Value::Float(f))
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 =>
        {
            Value::Int(*f as i64)
        }

        (ColumnType::Timestamp, Value::Text(s)) => DateTime::parse_from_rfc3339(s)
            .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
            .unwrap_or_else(|_| value.clone()),

        _ => value.clone(),
    }
}
