//! RemoteStore trait: the capability the engine consumes from a warehouse,
//! table describe/create/alter and parameterised query jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StoreError, SyncError};
use crate::schema::{SchemaField, TableId, TableSchema};
use crate::throttle::Throttler;
use crate::types::ColumnType;
use crate::value::{Record, Value};

/// Upper bound on how long a single `poll_job` call may wait server-side.
pub const DEFAULT_POLL_WAIT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// A typed query parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Scalar {
        column_type: ColumnType,
        value: Value,
    },
    Array {
        element_type: ColumnType,
        values: Vec<Value>,
    },
}

/// A named parameter, referenced in SQL as `@name`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParam {
    pub name: String,
    pub value: ParamValue,
}

/// SQL text plus its named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_scalar(mut self, name: impl Into<String>, column_type: ColumnType, value: Value) -> Self {
        self.params.push(QueryParam {
            name: name.into(),
            value: ParamValue::Scalar { column_type, value },
        });
        self
    }

    pub fn with_array(
        mut self,
        name: impl Into<String>,
        element_type: ColumnType,
        values: Vec<Value>,
    ) -> Self {
        self.params.push(QueryParam {
            name: name.into(),
            value: ParamValue::Array {
                element_type,
                values,
            },
        });
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Identifies a submitted query job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub location: Option<String>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            location: None,
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Still running after the poll wait elapsed.
    Pending,
    Done(Vec<Record>),
    Failed(StoreError),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Remote warehouse operations used by the sync engine.
///
/// Implementations must be safe to share across tasks. `describe_table`
/// returns `Ok(None)` for a table that does not exist.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn describe_table(&self, table: &TableId) -> Result<Option<TableSchema>, StoreError>;

    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> Result<(), StoreError>;

    /// Append columns. Never removes or retypes existing ones.
    async fn alter_table(&self, table: &TableId, add: &[SchemaField]) -> Result<(), StoreError>;

    async fn submit_query(&self, statement: &Statement) -> Result<JobHandle, StoreError>;

    /// Wait up to `wait` for the job to finish.
    async fn poll_job(&self, job: &JobHandle, wait: Duration) -> Result<JobStatus, StoreError>;

    /// Submit and poll until the job is no longer pending.
    async fn run_query(&self, statement: &Statement) -> Result<Vec<Record>, StoreError> {
        let job = self.submit_query(statement).await?;
        loop {
            match self.poll_job(&job, DEFAULT_POLL_WAIT).await? {
                JobStatus::Pending => {
                    debug!("Job {} still running", job.job_id);
                }
                JobStatus::Done(rows) => return Ok(rows),
                JobStatus::Failed(err) => return Err(err),
            }
        }
    }
}

/// Resolves credentials and opens a store. Called at the start of every
/// sync attempt so missing credentials fail before any remote call.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    type Store: RemoteStore;

    async fn connect(&self) -> Result<Self::Store, SyncError>;
}

// ---------------------------------------------------------------------------
// ThrottledStore
// ---------------------------------------------------------------------------

/// Wraps a store so every remote call first passes the throttler.
pub struct ThrottledStore<S> {
    inner: S,
    throttler: Option<Arc<Throttler>>,
}

impl<S: RemoteStore> ThrottledStore<S> {
    pub fn new(inner: S, throttler: Option<Arc<Throttler>>) -> Self {
        Self { inner, throttler }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn pace(&self) {
        if let Some(throttler) = &self.throttler {
            throttler.acquire().await;
        }
    }
}

#[async_trait]
impl<S: RemoteStore> RemoteStore for ThrottledStore<S> {
    async fn describe_table(&self, table: &TableId) -> Result<Option<TableSchema>, StoreError> {
        self.pace().await;
        self.inner.describe_table(table).await
    }

    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> Result<(), StoreError> {
        self.pace().await;
        self.inner.create_table(table, schema).await
    }

    async fn alter_table(&self, table: &TableId, add: &[SchemaField]) -> Result<(), StoreError> {
        self.pace().await;
        self.inner.alter_table(table, add).await
    }

    async fn submit_query(&self, statement: &Statement) -> Result<JobHandle, StoreError> {
        self.pace().await;
        self.inner.submit_query(statement).await
    }

    async fn poll_job(&self, job: &JobHandle, wait: Duration) -> Result<JobStatus, StoreError> {
        self.pace().await;
        self.inner.poll_job(job, wait).await
    }
}
