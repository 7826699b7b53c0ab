//! bqsync Core - table reconciliation engine
//!
//! Makes a remote table match an in-memory dataset:
//! - creates the table, or adds the columns it is missing
//! - fetches the rows that share reference ids with the dataset
//! - plans inserts and sparse updates with type-aware comparison
//! - writes them in parameter-bounded batches, retrying the whole sync on
//!   transient failures
//!
//! The remote store is consumed through [`RemoteStore`]; `bqsync-bigquery`
//! provides the BigQuery implementation and [`MemoryStore`] an in-process one.

pub mod compare;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod literal;
pub mod memory;
pub mod metrics;
pub mod planner;
pub mod query;
pub mod retry;
pub mod schema;
pub mod sql;
pub mod store;
pub mod sync;
pub mod throttle;
pub mod types;
pub mod value;

pub use compare::values_equal;
pub use dataset::{Column, Dataset, Row};
pub use error::{StoreError, SyncError};
pub use executor::{BatchExecutor, Phase, Progress, ProgressCallback};
pub use memory::MemoryStore;
pub use metrics::SyncMetrics;
pub use planner::{plan, ChangeSet, Mismatch, PlannedRow};
pub use query::{fetch_rows, QuerySource};
pub use retry::RetryPolicy;
pub use schema::{ensure_schema, reconcile_schema, SchemaChange, SchemaField, TableId, TableSchema};
pub use store::{
    JobHandle, JobStatus, ParamValue, QueryParam, RemoteStore, Statement, StoreConnector,
    ThrottledStore,
};
pub use sync::{SyncOptions, SyncResult, Synchronizer};
pub use throttle::Throttler;
pub use types::{infer_column_types, infer_type, ColumnType, ColumnTypes, SYNCED_AT};
pub use value::{Record, Value};
