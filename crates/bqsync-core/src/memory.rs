//! In-process [`RemoteStore`] for tests and dry runs.
//!
//! Understands the statements built by [`crate::sql`] (existing-row fetch,
//! multi-row insert, single-row update) and any SQL registered with
//! [`MemoryStore::with_query_result`]. Calls are counted, and failures or
//! pending polls can be scripted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{StoreError, SyncError};
use crate::schema::{SchemaField, TableId, TableSchema};
use crate::sql::NOW;
use crate::store::{JobHandle, JobStatus, ParamValue, RemoteStore, Statement, StoreConnector};
use crate::types::SYNCED_AT;
use crate::value::{Record, Value};

/// Number of calls made per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub describe: usize,
    pub create: usize,
    pub alter: usize,
    pub submit: usize,
    pub poll: usize,
}

#[derive(Debug, Default)]
struct TableData {
    schema: TableSchema,
    rows: Vec<Record>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<TableId, TableData>,
    canned: HashMap<String, Vec<Record>>,
    jobs: HashMap<String, Result<Vec<Record>, StoreError>>,
    statements: Vec<Statement>,
    calls: CallCounts,
    total_calls: usize,
    scheduled_failures: Vec<(usize, StoreError)>,
    pending_polls: usize,
}

impl State {
    /// Count one call and return the failure scheduled for it, if any.
    fn take_failure(&mut self) -> Result<(), StoreError> {
        self.total_calls += 1;
        let now = self.total_calls;
        match self.scheduled_failures.iter().position(|(n, _)| *n == now) {
            Some(pos) => Err(self.scheduled_failures.remove(pos).1),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: &TableId, schema: TableSchema, rows: Vec<Record>) -> Self {
        self.lock()
            .tables
            .insert(table.clone(), TableData { schema, rows });
        self
    }

    /// Rows returned by a statement whose SQL is exactly `sql`.
    pub fn with_query_result(self, sql: impl Into<String>, rows: Vec<Record>) -> Self {
        self.lock().canned.insert(sql.into(), rows);
        self
    }

    pub fn rows(&self, table: &TableId) -> Vec<Record> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn schema(&self, table: &TableId) -> Option<TableSchema> {
        self.lock().tables.get(table).map(|t| t.schema.clone())
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Every statement submitted so far, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.lock().statements.clone()
    }

    /// Fail the `nth` call from now (1 is the next call) with `error`.
    pub fn fail_call(&self, nth: usize, error: StoreError) {
        let mut state = self.lock();
        let at = state.total_calls + nth.max(1);
        state.scheduled_failures.push((at, error));
    }

    pub fn fail_next(&self, error: StoreError) {
        self.fail_call(1, error);
    }

    /// Make the next `n` polls report the job as still running.
    pub fn set_pending_polls(&self, n: usize) {
        self.lock().pending_polls = n;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn describe_table(&self, table: &TableId) -> Result<Option<TableSchema>, StoreError> {
        let mut state = self.lock();
        state.calls.describe += 1;
        state.take_failure()?;
        Ok(state.tables.get(table).map(|t| t.schema.clone()))
    }

    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.create += 1;
        state.take_failure()?;
        state.tables.entry(table.clone()).or_insert_with(|| TableData {
            schema: schema.clone(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn alter_table(&self, table: &TableId, add: &[SchemaField]) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.alter += 1;
        state.take_failure()?;
        let data = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NotFound(format!("Table {}", table)))?;
        for field in add {
            if !data.schema.contains(&field.name) {
                data.schema.fields.push(field.clone());
            }
        }
        Ok(())
    }

    async fn submit_query(&self, statement: &Statement) -> Result<JobHandle, StoreError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.calls.submit += 1;
        state.take_failure()?;
        state.statements.push(statement.clone());

        // Unsupported SQL is refused at submit; execution errors fail the job.
        let outcome = match state.canned.get(&statement.sql) {
            Some(rows) => Ok(rows.clone()),
            None => execute(&mut state.tables, statement)?,
        };

        let job_id = format!("job_{}", state.calls.submit);
        state.jobs.insert(job_id.clone(), outcome);
        Ok(JobHandle::new(job_id))
    }

    async fn poll_job(&self, job: &JobHandle, _wait: Duration) -> Result<JobStatus, StoreError> {
        let mut state = self.lock();
        state.calls.poll += 1;
        state.take_failure()?;
        if state.pending_polls > 0 {
            state.pending_polls -= 1;
            return Ok(JobStatus::Pending);
        }
        match state.jobs.get(&job.job_id) {
            Some(Ok(rows)) => Ok(JobStatus::Done(rows.clone())),
            Some(Err(err)) => Ok(JobStatus::Failed(err.clone())),
            None => Err(StoreError::NotFound(format!("Job {}", job.job_id))),
        }
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    type Store = MemoryStore;

    async fn connect(&self) -> Result<MemoryStore, SyncError> {
        Ok(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Statement execution
// ---------------------------------------------------------------------------

fn syntax_error(sql: &str) -> StoreError {
    StoreError::InvalidRequest(format!("Syntax error: unsupported statement: {}", sql))
}

type Outcome = Result<Vec<Record>, StoreError>;

fn execute(
    tables: &mut HashMap<TableId, TableData>,
    statement: &Statement,
) -> Result<Outcome, StoreError> {
    let sql = statement.sql.as_str();
    let outcome = if let Some(rest) = sql.strip_prefix("SELECT * FROM ") {
        select(tables, statement, rest)
    } else if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
        insert(tables, statement, rest)
    } else if let Some(rest) = sql.strip_prefix("UPDATE ") {
        update(tables, statement, rest)
    } else {
        None
    };
    outcome.ok_or_else(|| syntax_error(sql))
}

/// Split a leading back-quoted identifier off `input`.
fn ident(input: &str) -> Option<(String, &str)> {
    let body = input.strip_prefix('`')?;
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?.1),
            '`' => return Some((out, &body[i + 1..])),
            c => out.push(c),
        }
    }
    None
}

fn table_id(input: &str) -> Option<(TableId, &str)> {
    let (name, rest) = ident(input)?;
    Some((name.parse().ok()?, rest))
}

fn scalar<'a>(statement: &'a Statement, name: &str) -> Option<&'a Value> {
    match statement.param(name)? {
        ParamValue::Scalar { value, .. } => Some(value),
        ParamValue::Array { .. } => None,
    }
}

fn table_mut<'a>(
    tables: &'a mut HashMap<TableId, TableData>,
    table: &TableId,
) -> Result<&'a mut TableData, StoreError> {
    tables
        .get_mut(table)
        .ok_or_else(|| StoreError::NotFound(format!("Table {}", table)))
}

fn check_columns<'a>(
    schema: &TableSchema,
    columns: impl IntoIterator<Item = &'a String>,
) -> Result<(), StoreError> {
    for column in columns {
        if !schema.contains(column) {
            return Err(StoreError::InvalidRequest(format!(
                "Unrecognized name: {}",
                column
            )));
        }
    }
    Ok(())
}

fn select(
    tables: &mut HashMap<TableId, TableData>,
    statement: &Statement,
    rest: &str,
) -> Option<Outcome> {
    let (table, rest) = table_id(rest)?;
    let rest = rest.strip_prefix(" WHERE ")?;
    let (column, rest) = ident(rest)?;
    if rest != " IN UNNEST(@ref_ids)" {
        return None;
    }
    let ids: HashSet<String> = match statement.param("ref_ids")? {
        ParamValue::Array { values, .. } => values.iter().filter_map(Value::to_text).collect(),
        ParamValue::Scalar { .. } => return None,
    };

    Some(table_mut(tables, &table).and_then(|data| {
        check_columns(&data.schema, [&column])?;
        let fields: Vec<String> = data.schema.names().map(str::to_string).collect();
        Ok(data
            .rows
            .iter()
            .filter(|row| {
                row.get(&column)
                    .and_then(Value::to_text)
                    .is_some_and(|key| ids.contains(&key))
            })
            .map(|row| {
                fields
                    .iter()
                    .map(|f| (f.clone(), row.get(f).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect())
    }))
}

fn insert(
    tables: &mut HashMap<TableId, TableData>,
    statement: &Statement,
    rest: &str,
) -> Option<Outcome> {
    let (table, rest) = table_id(rest)?;
    let mut rest = rest.strip_prefix(" (")?;
    let mut columns = Vec::new();
    loop {
        let (column, after) = ident(rest)?;
        columns.push(column);
        if let Some(after) = after.strip_prefix(", ") {
            rest = after;
        } else {
            rest = after.strip_prefix(") VALUES ")?;
            break;
        }
    }
    if columns.last().map(String::as_str) != Some(SYNCED_AT) || !rest.contains(NOW) {
        return None;
    }
    let value_columns = &columns[..columns.len() - 1];

    // Row indices appear as `r{row}_c{col}` parameter names, in order.
    let mut row_ids: Vec<&str> = Vec::new();
    for param in &statement.params {
        let (row, _) = param.name.strip_prefix('r')?.split_once("_c")?;
        if row_ids.last() != Some(&row) {
            row_ids.push(row);
        }
    }

    let params: HashMap<&str, &Value> = statement
        .params
        .iter()
        .filter_map(|p| match &p.value {
            ParamValue::Scalar { value, .. } => Some((p.name.as_str(), value)),
            ParamValue::Array { .. } => None,
        })
        .collect();

    let mut new_rows = Vec::with_capacity(row_ids.len());
    for row in row_ids {
        let mut record = Record::new();
        for (c, column) in value_columns.iter().enumerate() {
            let value = params.get(format!("r{}_c{}", row, c).as_str())?;
            record.insert(column.clone(), (*value).clone());
        }
        record.insert(SYNCED_AT.to_string(), Value::Timestamp(Utc::now()));
        new_rows.push(record);
    }

    Some(table_mut(tables, &table).and_then(|data| {
        check_columns(&data.schema, &columns)?;
        data.rows.extend(new_rows);
        Ok(Vec::new())
    }))
}

fn update(
    tables: &mut HashMap<TableId, TableData>,
    statement: &Statement,
    rest: &str,
) -> Option<Outcome> {
    let (table, rest) = table_id(rest)?;
    let mut rest = rest.strip_prefix(" SET ")?;
    let mut assignments: Vec<(String, Value)> = Vec::new();
    loop {
        let (column, after) = ident(rest)?;
        let after = after.strip_prefix(" = ")?;
        let (expr, after) = match after.find(", `") {
            Some(i) if !after[..i].contains(" WHERE ") => (&after[..i], &after[i + 2..]),
            _ => {
                let i = after.find(" WHERE ")?;
                (&after[..i], &after[i..])
            }
        };
        let value = if expr == NOW {
            Value::Timestamp(Utc::now())
        } else {
            scalar(statement, expr.strip_prefix('@')?)?.clone()
        };
        assignments.push((column, value));
        if let Some(tail) = after.strip_prefix(" WHERE ") {
            rest = tail;
            break;
        }
        rest = after;
    }
    let (reference_column, tail) = ident(rest)?;
    if tail != " = @ref" {
        return None;
    }
    let key = scalar(statement, "ref")?.to_text();

    Some(table_mut(tables, &table).and_then(|data| {
        check_columns(&data.schema, assignments.iter().map(|(c, _)| c))?;
        check_columns(&data.schema, [&reference_column])?;
        for row in data.rows.iter_mut() {
            let matches = key.is_some()
                && row.get(&reference_column).and_then(Value::to_text) == key;
            if matches {
                for (column, value) in &assignments {
                    row.insert(column.clone(), value.clone());
                }
            }
        }
        Ok(Vec::new())
    }))
}
