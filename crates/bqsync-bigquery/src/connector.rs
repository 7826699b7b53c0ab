//! Builds authenticated [`BigQueryClient`]s for each sync attempt.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bqsync_core::{StoreConnector, SyncError};
use tracing::debug;
use url::Url;

use crate::auth::{ServiceAccountTokens, StaticToken, TokenSource};
use crate::client::BigQueryClient;

pub const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// How to reach BigQuery and which credentials to use.
#[derive(Debug, Clone)]
pub struct BigQuerySettings {
    pub api_base: String,
    /// Service-account key file. Ignored when `access_token` is set.
    pub service_account_file: Option<PathBuf>,
    pub access_token: Option<String>,
    /// Project that runs query jobs. Defaults to the key's project.
    pub job_project: Option<String>,
    pub location: Option<String>,
}

impl Default for BigQuerySettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            service_account_file: None,
            access_token: None,
            job_project: None,
            location: None,
        }
    }
}

/// Connects with fresh credentials on every call so a retried sync picks
/// up a rotated key.
#[derive(Debug, Clone)]
pub struct BigQueryConnector {
    settings: BigQuerySettings,
    /// Used for jobs when neither the settings nor the key name a project.
    fallback_project: String,
    http: reqwest::Client,
}

impl BigQueryConnector {
    pub fn new(settings: BigQuerySettings, fallback_project: impl Into<String>) -> Self {
        Self {
            settings,
            fallback_project: fallback_project.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn settings(&self) -> &BigQuerySettings {
        &self.settings
    }

    async fn token_source(&self) -> Result<(Arc<dyn TokenSource>, Option<String>), SyncError> {
        if let Some(token) = &self.settings.access_token {
            return Ok((Arc::new(StaticToken::new(token.clone())), None));
        }
        let path = self.settings.service_account_file.as_ref().ok_or_else(|| {
            SyncError::Configuration(
                "no BigQuery credentials: set a service account file or an access token".into(),
            )
        })?;
        let tokens = ServiceAccountTokens::from_file(path).await?;
        let project = tokens.project_id().map(str::to_string);
        Ok((Arc::new(tokens), project))
    }
}

#[async_trait]
impl StoreConnector for BigQueryConnector {
    type Store = BigQueryClient;

    async fn connect(&self) -> Result<BigQueryClient, SyncError> {
        let base = Url::parse(&self.settings.api_base).map_err(|e| {
            SyncError::Configuration(format!(
                "invalid BigQuery API base {}: {}",
                self.settings.api_base, e
            ))
        })?;
        let (tokens, key_project) = self.token_source().await?;
        let project = self
            .settings
            .job_project
            .clone()
            .or(key_project)
            .unwrap_or_else(|| self.fallback_project.clone());
        if project.is_empty() {
            return Err(SyncError::Configuration(
                "no project to run BigQuery jobs in; set BIGQUERY_PROJECT".into(),
            ));
        }

        debug!("Connecting to {} as project {}", base, project);
        Ok(BigQueryClient::new(
            self.http.clone(),
            base,
            project,
            self.settings.location.clone(),
            tokens,
        ))
    }
}
