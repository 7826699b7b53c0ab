//! Prometheus counters for sync runs.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabel(pub &'static str);

impl prometheus_client::encoding::EncodeLabelSet for OutcomeLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("outcome", self.0).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SyncMetrics {
    pub rows_inserted: Counter,
    pub rows_updated: Counter,
    pub rows_unchanged: Counter,
    pub insert_batches: Counter,
    pub sync_attempts: Counter,
    pub sync_retries: Counter,
    pub schema_columns_added: Counter,
    pub syncs_finished: Family<OutcomeLabel, Counter>,
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for SyncMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMetrics")
            .field("rows_inserted", &self.rows_inserted.get())
            .field("rows_updated", &self.rows_updated.get())
            .finish_non_exhaustive()
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Counters get the `_total` suffix appended on encode.
        let rows_inserted = Counter::default();
        registry.register(
            "bqsync_rows_inserted",
            "Rows inserted into target tables across all attempts, retried ones included",
            rows_inserted.clone(),
        );

        let rows_updated = Counter::default();
        registry.register(
            "bqsync_rows_updated",
            "Rows updated in target tables across all attempts, retried ones included",
            rows_updated.clone(),
        );

        let rows_unchanged = Counter::default();
        registry.register(
            "bqsync_rows_unchanged",
            "Dataset rows that already matched the target table",
            rows_unchanged.clone(),
        );

        let insert_batches = Counter::default();
        registry.register(
            "bqsync_insert_batches",
            "Multi-row insert statements executed",
            insert_batches.clone(),
        );

        let sync_attempts = Counter::default();
        registry.register(
            "bqsync_sync_attempts",
            "Sync attempts started, retries included",
            sync_attempts.clone(),
        );

        let sync_retries = Counter::default();
        registry.register(
            "bqsync_sync_retries",
            "Attempts re-run after a transient failure",
            sync_retries.clone(),
        );

        let schema_columns_added = Counter::default();
        registry.register(
            "bqsync_schema_columns_added",
            "Columns created or appended by schema reconciliation",
            schema_columns_added.clone(),
        );

        let syncs_finished = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "bqsync_syncs_finished",
            "Sync calls finished, by outcome",
            syncs_finished.clone(),
        );

        Self {
            rows_inserted,
            rows_updated,
            rows_unchanged,
            insert_batches,
            sync_attempts,
            sync_retries,
            schema_columns_added,
            syncs_finished,
            registry: Arc::new(registry),
        }
    }

    pub fn record_outcome(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.syncs_finished.get_or_create(&OutcomeLabel(outcome)).inc();
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
