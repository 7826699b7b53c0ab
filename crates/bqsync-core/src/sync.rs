//! Sync orchestrator: the single entry point that makes a remote table
//! match a dataset.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, enabled, info, Level};

use crate::dataset::Dataset;
use crate::error::SyncError;
use crate::executor::{BatchExecutor, ProgressCallback};
use crate::metrics::SyncMetrics;
use crate::planner::{mismatches, plan};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::schema::{reconcile_schema, TableId};
use crate::sql;
use crate::store::{RemoteStore, StoreConnector, ThrottledStore};
use crate::throttle::Throttler;
use crate::types::{infer_column_types, ColumnType, ColumnTypes, SYNCED_AT};
use crate::value::{Record, Value};

/// Rows written by a successful sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Clone)]
pub struct SyncOptions {
    pub retry: RetryPolicy,
    /// Server-side wait per insert-job poll.
    pub poll_interval: Duration,
    pub throttler: Option<Arc<Throttler>>,
    pub progress: Option<ProgressCallback>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(5),
            throttler: None,
            progress: None,
        }
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("retry", &self.retry)
            .field("poll_interval", &self.poll_interval)
            .field("throttler", &self.throttler)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl SyncOptions {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_throttler(mut self, throttler: Throttler) -> Self {
        self.throttler = Some(Arc::new(throttler));
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Synchronises datasets into tables reachable through `C`.
pub struct Synchronizer<C> {
    connector: C,
    options: SyncOptions,
    metrics: SyncMetrics,
}

impl<C: StoreConnector> Synchronizer<C> {
    pub fn new(connector: C, options: SyncOptions) -> Self {
        Self {
            connector,
            options,
            metrics: SyncMetrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Make `table` hold every row of `dataset`, keyed by `reference_column`.
    ///
    /// Creates or widens the table, inserts rows whose reference value is
    /// new and updates only the columns that changed. Rows absent from the
    /// dataset are left alone. Credentials are checked before the reference
    /// column. The whole sequence is re-run on transient
    /// failures according to the retry policy; on terminal failure the last
    /// error is returned.
    pub async fn sync(
        &self,
        dataset: &Dataset,
        reference_column: &str,
        table: &TableId,
    ) -> Result<SyncResult, SyncError> {
        let target = table.to_string();
        let result = retry_with_backoff(
            &self.options.retry,
            "sync",
            &target,
            |_| {
                self.metrics.sync_retries.inc();
            },
            move |attempt| self.sync_attempt(dataset, reference_column, table, attempt),
        )
        .await;

        self.metrics.record_outcome(result.is_ok());
        result
    }

    async fn sync_attempt(
        &self,
        dataset: &Dataset,
        reference_column: &str,
        table: &TableId,
        attempt: u32,
    ) -> Result<SyncResult, SyncError> {
        self.metrics.sync_attempts.inc();
        debug!("Sync attempt {} for {}", attempt, table);

        let store = ThrottledStore::new(self.connector.connect().await?, self.options.throttler.clone());
        if !dataset.has_column(reference_column) {
            return Err(SyncError::Validation(format!(
                "reference column '{}' is not in the dataset",
                reference_column
            )));
        }

        let inferred = infer_column_types(dataset);
        let change = reconcile_schema(&store, table, dataset, &inferred).await?;
        self.metrics
            .schema_columns_added
            .inc_by(change.added.len() as u64);
        let types = change.schema.binding_types(&inferred);

        if dataset.is_empty() {
            info!("No reference IDs found in dataset; skipping update.");
            return Ok(SyncResult::default());
        }

        let existing = self.fetch_existing(&store, dataset, reference_column, table, &types).await?;

        let changes = plan(dataset, &existing, reference_column);
        if enabled!(Level::DEBUG) {
            let diffs = mismatches(&existing, reference_column, &changes.to_update);
            if !diffs.is_empty() {
                debug!("Mismatches for updated rows:");
                for diff in &diffs {
                    debug!("    {}", diff);
                }
            }
        }

        let executor = BatchExecutor::new(&store, &self.metrics, self.options.poll_interval)
            .with_progress(self.options.progress.clone());
        let insert_columns: Vec<String> = dataset
            .column_names()
            .filter(|c| *c != SYNCED_AT)
            .map(str::to_string)
            .collect();
        let inserted = executor
            .apply_inserts(table, &insert_columns, &changes.to_insert, &types)
            .await?;
        let updated = executor
            .apply_updates(table, reference_column, &changes.to_update, &types)
            .await?;

        let unchanged = dataset.num_rows().saturating_sub(inserted + updated);
        self.metrics.rows_unchanged.inc_by(unchanged as u64);
        info!(
            "Sync complete: {} rows added and {} rows updated.",
            inserted, updated
        );
        Ok(SyncResult { inserted, updated })
    }

    async fn fetch_existing<S: RemoteStore>(
        &self,
        store: &S,
        dataset: &Dataset,
        reference_column: &str,
        table: &TableId,
        types: &ColumnTypes,
    ) -> Result<Vec<Record>, SyncError> {
        let mut seen = HashSet::new();
        let ref_ids: Vec<Value> = dataset
            .rows()
            .filter_map(|row| row.get(reference_column))
            .filter(|v| v.to_text().is_some_and(|key| seen.insert(key)))
            .cloned()
            .collect();
        if ref_ids.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            "Querying {} reference IDs from {}",
            ref_ids.len(),
            table
        );
        let reference_type = types
            .get(reference_column)
            .copied()
            .unwrap_or(ColumnType::String);
        let statement = sql::fetch_existing(table, reference_column, reference_type, ref_ids);
        store
            .run_query(&statement)
            .await
            .map_err(|e| SyncError::remote("fetch existing rows", table, e))
    }
}
