//! BigQuery REST v2 implementation of [`RemoteStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bqsync_core::sql::{quote_ident, table_ref};
use bqsync_core::{
    JobHandle, JobStatus, RemoteStore, SchemaField, Statement, StoreError, TableId, TableSchema,
};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::auth::TokenSource;
use crate::error::{classify_job_error, classify_response, classify_transport};
use crate::model::{
    decode_rows, encode_parameter, ErrorProto, JobConfiguration, JobInsert, JobReference,
    JobResource, QueryConfiguration, QueryResults, SchemaResource, TableReference, TableResource,
};

/// Slack added on top of the server-side wait for each HTTP request.
const REQUEST_SLACK: Duration = Duration::from_secs(60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Talks to one BigQuery endpoint on behalf of one billing project.
pub struct BigQueryClient {
    http: reqwest::Client,
    base: Url,
    project: String,
    location: Option<String>,
    tokens: Arc<dyn TokenSource>,
}

impl BigQueryClient {
    pub fn new(
        http: reqwest::Client,
        base: Url,
        project: impl Into<String>,
        location: Option<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            base,
            project: project.into(),
            location,
            tokens,
        }
    }

    /// Project that query jobs run (and are billed) in.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Append path segments to the API base, escaping each one.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidRequest(format!("unusable API base {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn table_url(&self, table: &TableId) -> Result<Url, StoreError> {
        self.endpoint(&[
            "projects",
            &table.project,
            "datasets",
            &table.dataset,
            "tables",
            &table.table,
        ])
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, StoreError> {
        let token = self.tokens.token().await?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(token)
            .timeout(DEFAULT_REQUEST_TIMEOUT))
    }

    /// Send a request and decode a JSON body, classifying failures.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(status, &body));
        }
        response.json::<T>().await.map_err(classify_transport)
    }

    async fn get_job(&self, job: &JobHandle) -> Result<JobResource, StoreError> {
        let url = self.endpoint(&["projects", &self.project, "jobs", &job.job_id])?;
        let mut request = self.request(Method::GET, url).await?;
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            request = request.query(&[("location", location)]);
        }
        self.send(request).await
    }

    async fn fetch_results(
        &self,
        job: &JobHandle,
        wait: Duration,
        page_token: Option<&str>,
    ) -> Result<QueryResults, StoreError> {
        let url = self.endpoint(&["projects", &self.project, "queries", &job.job_id])?;
        let mut query: Vec<(&str, String)> = vec![
            ("timeoutMs", wait.as_millis().to_string()),
            ("formatOptions.useInt64Timestamp", "true".to_string()),
        ];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            query.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let request = self
            .request(Method::GET, url)
            .await?
            .query(&query)
            .timeout(wait + REQUEST_SLACK);
        self.send(request).await
    }
}

/// The failure recorded on a job, if any. Only `status.errorResult` marks
/// a job as failed; `status.errors` may hold warnings.
pub fn job_error(job: &JobResource) -> Option<StoreError> {
    job.status
        .as_ref()
        .and_then(|s| s.error_result.as_ref())
        .map(classify_job_error)
}

fn describe_error(error: &ErrorProto) -> String {
    format!(
        "{}: {}",
        error.reason.as_deref().unwrap_or("unknown"),
        error.message.as_deref().unwrap_or_default()
    )
}

/// `ALTER TABLE` statement adding `fields`, tolerant of concurrent adds.
pub fn alter_table_ddl(table: &TableId, fields: &[SchemaField]) -> String {
    let additions: Vec<String> = fields
        .iter()
        .map(|f| {
            let ty = f
                .column_type()
                .map(|t| t.sql_type().to_string())
                .unwrap_or_else(|| f.field_type.clone());
            format!("ADD COLUMN IF NOT EXISTS {} {}", quote_ident(&f.name), ty)
        })
        .collect();
    format!("ALTER TABLE {} {}", table_ref(table), additions.join(", "))
}

/// Body for `jobs.insert` running `statement` as a standard-SQL query.
pub fn job_request(project: &str, job_id: &str, location: Option<&str>, statement: &Statement) -> JobInsert {
    let query_parameters: Vec<_> = statement.params.iter().map(encode_parameter).collect();
    JobInsert {
        job_reference: JobReference {
            project_id: project.to_string(),
            job_id: job_id.to_string(),
            location: location.map(str::to_string),
        },
        configuration: JobConfiguration {
            query: QueryConfiguration {
                query: statement.sql.clone(),
                use_legacy_sql: false,
                parameter_mode: (!query_parameters.is_empty()).then(|| "NAMED".to_string()),
                query_parameters,
            },
        },
    }
}

#[async_trait]
impl RemoteStore for BigQueryClient {
    async fn describe_table(&self, table: &TableId) -> Result<Option<TableSchema>, StoreError> {
        let request = self.request(Method::GET, self.table_url(table)?).await?;
        match self.send::<TableResource>(request).await {
            Ok(resource) => Ok(Some(resource.schema.unwrap_or_default().into())),
            Err(StoreError::NotFound(msg)) => {
                debug!("Table {} does not exist: {}", table, msg);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> Result<(), StoreError> {
        let url = self.endpoint(&[
            "projects",
            &table.project,
            "datasets",
            &table.dataset,
            "tables",
        ])?;
        let body = TableResource {
            table_reference: TableReference::from(table),
            schema: Some(SchemaResource::from(schema)),
        };
        let request = self.request(Method::POST, url).await?.json(&body);
        let response = request.send().await.map_err(classify_transport)?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                // Created concurrently; the caller re-reads the schema next run.
                info!("Table {} already exists", table);
                Ok(())
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(classify_response(s, &body))
            }
        }
    }

    async fn alter_table(&self, table: &TableId, add: &[SchemaField]) -> Result<(), StoreError> {
        if add.is_empty() {
            return Ok(());
        }
        let statement = Statement::new(alter_table_ddl(table, add));
        self.run_query(&statement).await.map(|_| ())
    }

    async fn submit_query(&self, statement: &Statement) -> Result<JobHandle, StoreError> {
        let job_id = format!("bqsync_{}", Uuid::new_v4().simple());
        let body = job_request(&self.project, &job_id, self.location.as_deref(), statement);
        let url = self.endpoint(&["projects", &self.project, "jobs"])?;
        let request = self.request(Method::POST, url).await?.json(&body);
        let job: JobResource = self.send(request).await?;

        if let Some(error) = job_error(&job) {
            return Err(error);
        }
        debug!(
            "Submitted job {} ({} parameters)",
            job.job_reference.job_id,
            statement.params.len()
        );
        Ok(JobHandle {
            job_id: job.job_reference.job_id,
            location: job.job_reference.location.or_else(|| self.location.clone()),
        })
    }

    async fn poll_job(&self, job: &JobHandle, wait: Duration) -> Result<JobStatus, StoreError> {
        let first = self.fetch_results(job, wait, None).await?;
        if !first.job_complete {
            return Ok(JobStatus::Pending);
        }
        if !first.errors.is_empty() {
            // Entries here may be warnings; the job status decides.
            if let Some(error) = job_error(&self.get_job(job).await?) {
                return Ok(JobStatus::Failed(error));
            }
            for warning in &first.errors {
                warn!("Job {} reported: {}", job.job_id, describe_error(warning));
            }
        }

        let schema = first.schema.clone().unwrap_or_default();
        let mut rows = decode_rows(&schema, &first.rows)?;
        let mut page_token = first.page_token;
        while let Some(token) = page_token {
            let page = self.fetch_results(job, wait, Some(&token)).await?;
            rows.extend(decode_rows(&schema, &page.rows)?);
            page_token = page.page_token;
        }
        Ok(JobStatus::Done(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use bqsync_core::{ColumnType, Value};
    use serde_json::json;

    fn client(base: &str) -> BigQueryClient {
        BigQueryClient::new(
            reqwest::Client::new(),
            Url::parse(base).unwrap(),
            "billing-proj",
            Some("EU".into()),
            Arc::new(StaticToken::new("t")),
        )
    }

    #[test]
    fn endpoints_escape_segments() {
        let c = client("https://bigquery.googleapis.com/bigquery/v2");
        let url = c
            .table_url(&TableId::new("p", "d", "events 2024"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://bigquery.googleapis.com/bigquery/v2/projects/p/datasets/d/tables/events%202024"
        );
    }

    #[test]
    fn trailing_slash_in_base_is_tolerated() {
        let c = client("http://localhost:9050/bigquery/v2/");
        let url = c.endpoint(&["projects", "p", "jobs"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9050/bigquery/v2/projects/p/jobs");
    }

    #[test]
    fn alter_uses_standard_sql_types() {
        let ddl = alter_table_ddl(
            &TableId::new("p", "d", "t"),
            &[
                SchemaField::new("region", ColumnType::String),
                SchemaField::new("score", ColumnType::Integer),
            ],
        );
        assert_eq!(
            ddl,
            "ALTER TABLE `p.d.t` ADD COLUMN IF NOT EXISTS `region` STRING, ADD COLUMN IF NOT EXISTS `score` INT64"
        );
    }

    #[test]
    fn job_request_uses_named_parameters() {
        let statement = Statement::new("UPDATE `p.d.t` SET `a` = @c0 WHERE `id` = @ref")
            .with_scalar("c0", ColumnType::Float, Value::Float(1.5))
            .with_scalar("ref", ColumnType::String, Value::from("x1"));
        let body = job_request("billing-proj", "bqsync_1", Some("EU"), &statement);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "jobReference": {"projectId": "billing-proj", "jobId": "bqsync_1", "location": "EU"},
                "configuration": {"query": {
                    "query": "UPDATE `p.d.t` SET `a` = @c0 WHERE `id` = @ref",
                    "useLegacySql": false,
                    "parameterMode": "NAMED",
                    "queryParameters": [
                        {"name": "c0", "parameterType": {"type": "FLOAT64"}, "parameterValue": {"value": "1.5"}},
                        {"name": "ref", "parameterType": {"type": "STRING"}, "parameterValue": {"value": "x1"}}
                    ]
                }}
            })
        );
    }

    #[test]
    fn warnings_in_query_results_do_not_fail_the_job() {
        let results: QueryResults = serde_json::from_value(json!({
            "jobComplete": true,
            "errors": [{"reason": "backendError", "message": "slow shard"}],
            "schema": {"fields": [{"name": "id", "type": "STRING"}]},
            "rows": [{"f": [{"v": "x1"}]}]
        }))
        .unwrap();
        assert!(results.job_complete);
        assert_eq!(results.errors.len(), 1);
        let rows = decode_rows(&results.schema.clone().unwrap_or_default(), &results.rows).unwrap();
        assert_eq!(rows[0].get("id"), Some(&Value::from("x1")));

        let done: JobResource = serde_json::from_value(json!({
            "jobReference": {"projectId": "p", "jobId": "bqsync_1"},
            "status": {
                "state": "DONE",
                "errors": [{"reason": "backendError", "message": "slow shard"}]
            }
        }))
        .unwrap();
        assert!(job_error(&done).is_none());
    }

    #[test]
    fn error_result_fails_the_job() {
        let failed: JobResource = serde_json::from_value(json!({
            "jobReference": {"projectId": "p", "jobId": "bqsync_1"},
            "status": {
                "state": "DONE",
                "errorResult": {"reason": "invalidQuery", "message": "Unrecognized name: foo"}
            }
        }))
        .unwrap();
        assert!(matches!(job_error(&failed), Some(StoreError::InvalidRequest(_))));
    }

    #[test]
    fn plain_queries_omit_parameter_mode() {
        let body = job_request("p", "j", None, &Statement::new("SELECT 1"));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json["configuration"]["query"],
            json!({"query": "SELECT 1", "useLegacySql": false})
        );
        assert!(json["jobReference"].get("location").is_none());
    }
}
