//! OAuth access tokens for the BigQuery API.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bqsync_core::{StoreError, SyncError};
use tracing::debug;
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::{parse_service_account_key, ServiceAccountAuthenticator};

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

/// Supplies bearer tokens for API requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, StoreError>;
}

/// A pre-issued token, e.g. from `gcloud auth print-access-token`.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, StoreError> {
        Ok(self.0.clone())
    }
}

/// Tokens minted from a service-account key file. The authenticator caches
/// and refreshes them.
pub struct ServiceAccountTokens {
    authenticator: DefaultAuthenticator,
    project_id: Option<String>,
    path: PathBuf,
}

impl ServiceAccountTokens {
    /// Load the key at `path`. A missing or malformed file is a
    /// configuration error.
    pub async fn from_file(path: &Path) -> Result<Self, SyncError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(SyncError::Configuration(format!(
                "Service account file not found: {}",
                path.display()
            )));
        }
        let raw = tokio::fs::read(path).await.map_err(|e| {
            SyncError::Configuration(format!(
                "cannot read service account file {}: {}",
                path.display(),
                e
            ))
        })?;
        let key = parse_service_account_key(raw).map_err(|e| {
            SyncError::Configuration(format!(
                "invalid service account key {}: {}",
                path.display(),
                e
            ))
        })?;
        let project_id = key.project_id.clone();
        let authenticator = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| {
                SyncError::Configuration(format!("cannot build authenticator: {}", e))
            })?;

        debug!("Loaded service account key from {}", path.display());
        Ok(Self {
            authenticator,
            project_id,
            path: path.to_path_buf(),
        })
    }

    /// Project the key belongs to, if recorded in the file.
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokens {
    async fn token(&self) -> Result<String, StoreError> {
        let token = self
            .authenticator
            .token(&[BIGQUERY_SCOPE])
            .await
            .map_err(|e| StoreError::Auth(format!("{}: {}", self.path.display(), e)))?;
        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Auth("token response carried no access token".into()))
    }
}
