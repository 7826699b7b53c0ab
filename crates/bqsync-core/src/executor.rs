//! Batch executor: writes planned inserts and updates to the remote store.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::SyncError;
use crate::metrics::SyncMetrics;
use crate::planner::PlannedRow;
use crate::schema::TableId;
use crate::sql;
use crate::store::{JobStatus, RemoteStore};
use crate::types::ColumnTypes;

/// Which write path a progress report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Insert,
    Update,
}

/// Rows written so far in one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    pub processed: usize,
    pub total: usize,
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

pub struct BatchExecutor<'a, S: ?Sized> {
    store: &'a S,
    metrics: &'a SyncMetrics,
    poll_interval: Duration,
    progress: Option<ProgressCallback>,
}

impl<'a, S: RemoteStore + ?Sized> BatchExecutor<'a, S> {
    pub fn new(store: &'a S, metrics: &'a SyncMetrics, poll_interval: Duration) -> Self {
        Self {
            store,
            metrics,
            poll_interval,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    fn report(&self, phase: Phase, processed: usize, total: usize) {
        if let Some(callback) = &self.progress {
            callback(Progress {
                phase,
                processed,
                total,
            });
        }
    }

    /// Insert `rows` in multi-row statements sized by
    /// [`sql::insert_batch_size`]. Returns the number of rows inserted.
    ///
    /// Each batch is polled until it completes; a poll that times out is
    /// logged and polled again.
    pub async fn apply_inserts(
        &self,
        table: &TableId,
        columns: &[String],
        rows: &[PlannedRow],
        types: &ColumnTypes,
    ) -> Result<usize, SyncError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let batch_size = sql::insert_batch_size(columns.len());
        let total = rows.len();
        let total_batches = total.div_ceil(batch_size);
        let mut inserted = 0;

        for (batch_index, batch) in rows.chunks(batch_size).enumerate() {
            let batch_no = batch_index + 1;
            info!(
                "Inserting batch {}/{} with {} rows...",
                batch_no,
                total_batches,
                batch.len()
            );

            let statement =
                sql::insert_batch(table, columns, batch, types, batch_index * batch_size);
            let job = self
                .store
                .submit_query(&statement)
                .await
                .map_err(|e| SyncError::remote("insert batch", table, e))?;

            loop {
                let status = self
                    .store
                    .poll_job(&job, self.poll_interval)
                    .await
                    .map_err(|e| SyncError::remote("insert batch", table, e))?;
                match status {
                    JobStatus::Pending => info!("Insert batch {} still running...", batch_no),
                    JobStatus::Done(_) => break,
                    JobStatus::Failed(e) => return Err(SyncError::remote("insert batch", table, e)),
                }
            }

            inserted += batch.len();
            self.metrics.insert_batches.inc();
            self.metrics.rows_inserted.inc_by(batch.len() as u64);
            info!(
                "Batch {} inserted. Total rows inserted so far: {}/{}.",
                batch_no, inserted, total
            );
            self.report(Phase::Insert, inserted, total);
        }

        info!("Inserted {} rows in total.", inserted);
        Ok(inserted)
    }

    /// Issue one update per row, targeted by `reference_column`. Progress
    /// is reported roughly every tenth of the rows and on the last one.
    pub async fn apply_updates(
        &self,
        table: &TableId,
        reference_column: &str,
        rows: &[PlannedRow],
        types: &ColumnTypes,
    ) -> Result<usize, SyncError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let total = rows.len();
        let step = (total / 10).max(1);

        for (index, row) in rows.iter().enumerate() {
            let count = index + 1;
            let statement = sql::update_row(table, reference_column, row, types);
            self.store
                .run_query(&statement)
                .await
                .map_err(|e| SyncError::remote("update row", table, e))?;
            self.metrics.rows_updated.inc();

            if count % step == 0 || count == total {
                let percent = count * 100 / total;
                info!(
                    "Processed {}% of batch updates ({}/{})",
                    percent, count, total
                );
                self.report(Phase::Update, count, total);
            }
        }

        info!("Updated {} rows.", total);
        Ok(total)
    }
}
