//! Ad-hoc query helper: run SQL given inline or in a file and return rows.

use std::path::PathBuf;

use tracing::{error, info};

use crate::error::SyncError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::{RemoteStore, Statement, StoreConnector};
use crate::value::Record;

/// Where the SQL text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Inline(String),
    File(PathBuf),
}

impl QuerySource {
    /// Inline text wins when both are given.
    pub fn from_parts(sql: Option<String>, file: Option<PathBuf>) -> Result<Self, SyncError> {
        match (sql, file) {
            (Some(sql), _) if !sql.is_empty() => Ok(QuerySource::Inline(sql)),
            (_, Some(file)) => Ok(QuerySource::File(file)),
            (Some(_), None) => Err(SyncError::Validation("Query string cannot be empty".into())),
            (None, None) => Err(SyncError::Validation(
                "Either a query string or a query file must be provided".into(),
            )),
        }
    }

    /// Resolve the SQL text. A missing file is a configuration error and
    /// blank text a validation error.
    pub async fn load(&self) -> Result<String, SyncError> {
        let text = match self {
            QuerySource::Inline(sql) => sql.clone(),
            QuerySource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                SyncError::Configuration(format!(
                    "cannot read query file {}: {}",
                    path.display(),
                    e
                ))
            })?,
        };
        if text.trim().is_empty() {
            error!("Query string is empty");
            return Err(SyncError::Validation("Query string cannot be empty".into()));
        }
        Ok(text)
    }
}

/// Run the query from `source`, retrying transient failures with `policy`.
pub async fn fetch_rows<C: StoreConnector>(
    connector: &C,
    source: &QuerySource,
    policy: &RetryPolicy,
) -> Result<Vec<Record>, SyncError> {
    let sql = source.load().await?;
    let statement = &Statement::new(sql);

    let rows = retry_with_backoff(policy, "query", "ad-hoc query", |_| {}, move |_| async move {
        let store = connector.connect().await?;
        info!("Executing query");
        store
            .run_query(statement)
            .await
            .map_err(|e| SyncError::remote("query", "ad-hoc query", e))
    })
    .await?;

    info!("Query executed successfully: {} rows", rows.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::MemoryStore;
    use crate::value::Value;
    use std::io::Write;

    #[test]
    fn inline_text_is_preferred() {
        let source = QuerySource::from_parts(Some("SELECT 1".into()), Some("q.sql".into())).unwrap();
        assert_eq!(source, QuerySource::Inline("SELECT 1".into()));
    }

    #[test]
    fn neither_source_is_a_validation_error() {
        let err = QuerySource::from_parts(None, None).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(QuerySource::from_parts(Some(String::new()), None).is_err());
    }

    #[tokio::test]
    async fn loads_sql_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "SELECT name FROM companies").unwrap();
        let source = QuerySource::File(file.path().to_path_buf());
        assert_eq!(source.load().await.unwrap().trim(), "SELECT name FROM companies");
    }

    #[tokio::test]
    async fn missing_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = QuerySource::File(dir.path().join("missing.sql"));
        assert!(matches!(source.load().await, Err(SyncError::Configuration(_))));
    }

    #[tokio::test]
    async fn blank_file_is_a_validation_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = QuerySource::File(file.path().to_path_buf());
        assert!(matches!(source.load().await, Err(SyncError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let mut row = Record::new();
        row.insert("name".into(), Value::from("Acme"));
        let store = MemoryStore::new().with_query_result("SELECT name FROM companies", vec![row]);
        store.fail_next(StoreError::Transient("rateLimitExceeded".into()));

        let rows = fetch_rows(
            &store,
            &QuerySource::Inline("SELECT name FROM companies".into()),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(store.calls().submit, 2);
    }
}
