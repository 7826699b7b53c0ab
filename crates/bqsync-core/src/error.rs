//! Typed errors for the sync engine.

use thiserror::Error;

/// Failures reported by a [`RemoteStore`](crate::store::RemoteStore) call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The table, dataset or job does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The statement or request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Credentials were rejected or no token could be obtained.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network failure, throttling, timeout or a server-side hiccup.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Any other refusal by the remote store.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The response could not be decoded.
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Whether re-running the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Errors surfaced by [`Synchronizer::sync`](crate::sync::Synchronizer::sync)
/// and the query helpers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or unusable credentials/configuration. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input that cannot be processed (empty query, unknown reference column).
    #[error("validation error: {0}")]
    Validation(String),

    /// The remote store refused to create or alter the table schema.
    #[error("schema change rejected for {table}: {source}")]
    Schema { table: String, source: StoreError },

    /// A remote call failed; retried when `source` is transient.
    #[error("{operation} failed for {target}: {source}")]
    Remote {
        operation: &'static str,
        target: String,
        source: StoreError,
    },
}

impl SyncError {
    pub fn remote(operation: &'static str, target: impl ToString, source: StoreError) -> Self {
        SyncError::Remote {
            operation,
            target: target.to_string(),
            source,
        }
    }

    /// Whether the outer retry policy should re-run the sync.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Remote { source, .. } | SyncError::Schema { source, .. } => {
                source.is_transient()
            }
            SyncError::Configuration(_) | SyncError::Validation(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_store_errors_are_retryable() {
        assert!(StoreError::Transient("503".into()).is_transient());
        assert!(!StoreError::PermissionDenied("no".into()).is_transient());
        assert!(!StoreError::InvalidRequest("bad".into()).is_transient());
    }

    #[test]
    fn schema_error_follows_underlying_cause() {
        let fatal = SyncError::Schema {
            table: "p.d.t".into(),
            source: StoreError::PermissionDenied("alter".into()),
        };
        assert!(!fatal.is_transient());

        let flaky = SyncError::Schema {
            table: "p.d.t".into(),
            source: StoreError::Transient("backendError".into()),
        };
        assert!(flaky.is_transient());
    }

    #[test]
    fn configuration_and_validation_are_fatal() {
        assert!(!SyncError::Configuration("missing key".into()).is_transient());
        assert!(!SyncError::Validation("empty".into()).is_transient());
    }

    #[test]
    fn remote_error_message_names_operation_and_target() {
        let err = SyncError::remote(
            "fetch existing rows",
            "p.d.t",
            StoreError::Transient("timeout".into()),
        );
        assert_eq!(
            err.to_string(),
            "fetch existing rows failed for p.d.t: transient failure: timeout"
        );
    }
}
