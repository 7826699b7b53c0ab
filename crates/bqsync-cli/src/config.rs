//! Job configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bqsync_bigquery::{BigQuerySettings, DEFAULT_API_BASE};
use bqsync_core::{RetryPolicy, SyncOptions, Throttler};

/// Deployment environment; selects the target project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Prod,
    Dev,
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(Environment::Prod),
            "dev" | "development" => Ok(Environment::Dev),
            other => bail!("unknown environment '{}', expected prod or dev", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub environment: Environment,
    /// Target project for the selected environment, if configured.
    pub project: Option<String>,
    pub service_account_file: Option<PathBuf>,
    pub api_base: String,
    pub location: Option<String>,
    /// Static bearer token, e.g. for an emulator. Skips the key file.
    pub access_token: Option<String>,
    pub max_attempts: u32,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    pub poll_interval_secs: u64,
    /// Calls per period; None disables throttling.
    pub rate_limit: Option<usize>,
    pub rate_period_secs: u64,
}

impl JobConfig {
    pub fn from_env() -> Result<Self> {
        let environment: Environment = std::env::var("BQSYNC_ENV")
            .unwrap_or_else(|_| "prod".to_string())
            .parse()
            .context("Invalid BQSYNC_ENV")?;
        let project = match environment {
            Environment::Prod => std::env::var("BIGQUERY_PROJECT").ok(),
            Environment::Dev => std::env::var("BIGQUERY_DEV_PROJECT").ok(),
        };

        Ok(Self {
            environment,
            project,
            service_account_file: std::env::var("BIGQUERY_SERVICE_ACCOUNT_FILE_PATH")
                .ok()
                .map(PathBuf::from),
            api_base: std::env::var("BIGQUERY_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            location: std::env::var("BIGQUERY_LOCATION").ok(),
            access_token: std::env::var("BIGQUERY_ACCESS_TOKEN").ok(),
            max_attempts: std::env::var("SYNC_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .context("Invalid SYNC_MAX_ATTEMPTS")?,
            backoff_min_secs: std::env::var("SYNC_BACKOFF_MIN_SECS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("Invalid SYNC_BACKOFF_MIN_SECS")?,
            backoff_max_secs: std::env::var("SYNC_BACKOFF_MAX_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid SYNC_BACKOFF_MAX_SECS")?,
            poll_interval_secs: std::env::var("SYNC_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid SYNC_POLL_INTERVAL_SECS")?,
            rate_limit: std::env::var("SYNC_RATE_LIMIT")
                .ok()
                .map(|v| v.parse::<usize>())
                .transpose()
                .context("Invalid SYNC_RATE_LIMIT")?,
            rate_period_secs: std::env::var("SYNC_RATE_PERIOD_SECS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("Invalid SYNC_RATE_PERIOD_SECS")?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            min_delay: Duration::from_secs(self.backoff_min_secs),
            max_delay: Duration::from_secs(self.backoff_max_secs),
            ..RetryPolicy::default()
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        let options = SyncOptions::default()
            .with_retry(self.retry_policy())
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs));
        match self.rate_limit {
            Some(limit) => options.with_throttler(Throttler::new(
                limit,
                Duration::from_secs(self.rate_period_secs),
            )),
            None => options,
        }
    }

    /// Store settings; `credentials` overrides the configured key file.
    pub fn bigquery_settings(&self, credentials: Option<PathBuf>) -> BigQuerySettings {
        BigQuerySettings {
            api_base: self.api_base.clone(),
            service_account_file: credentials.or_else(|| self.service_account_file.clone()),
            access_token: self.access_token.clone(),
            job_project: self.project.clone(),
            location: self.location.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid races.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "BQSYNC_ENV",
            "BIGQUERY_PROJECT",
            "BIGQUERY_DEV_PROJECT",
            "BIGQUERY_SERVICE_ACCOUNT_FILE_PATH",
            "BIGQUERY_API_BASE",
            "BIGQUERY_LOCATION",
            "BIGQUERY_ACCESS_TOKEN",
            "SYNC_MAX_ATTEMPTS",
            "SYNC_BACKOFF_MIN_SECS",
            "SYNC_BACKOFF_MAX_SECS",
            "SYNC_POLL_INTERVAL_SECS",
            "SYNC_RATE_LIMIT",
            "SYNC_RATE_PERIOD_SECS",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        let config = JobConfig::from_env().unwrap();
        assert_eq!(config.environment, Environment::Prod);
        assert_eq!(config.project, None);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.poll_interval_secs, 5);
        assert!(config.sync_options().throttler.is_none());
    }

    #[test]
    fn dev_environment_selects_dev_project() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("BQSYNC_ENV", "dev");
            std::env::set_var("BIGQUERY_PROJECT", "analytics");
            std::env::set_var("BIGQUERY_DEV_PROJECT", "analytics-dev");
        }
        let config = JobConfig::from_env().unwrap();
        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.project.as_deref(), Some("analytics-dev"));

        unsafe { std::env::set_var("BQSYNC_ENV", "prod") };
        let config = JobConfig::from_env().unwrap();
        assert_eq!(config.project.as_deref(), Some("analytics"));
    }

    #[test]
    fn retry_and_throttle_settings() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("SYNC_MAX_ATTEMPTS", "3");
            std::env::set_var("SYNC_BACKOFF_MIN_SECS", "1");
            std::env::set_var("SYNC_BACKOFF_MAX_SECS", "10");
            std::env::set_var("SYNC_RATE_LIMIT", "100");
            std::env::set_var("SYNC_RATE_PERIOD_SECS", "60");
        }
        let config = JobConfig::from_env().unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.min_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(10));

        let throttler = config.sync_options().throttler.unwrap();
        assert_eq!(throttler.rate_limit(), 100);
        assert_eq!(throttler.period(), Duration::from_secs(60));
    }

    #[test]
    fn invalid_values_are_reported() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe { std::env::set_var("SYNC_MAX_ATTEMPTS", "many") };
        let err = JobConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("SYNC_MAX_ATTEMPTS"));

        clear_env();
        unsafe { std::env::set_var("BQSYNC_ENV", "staging") };
        assert!(JobConfig::from_env().is_err());
    }

    #[test]
    fn credentials_argument_overrides_environment() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("BIGQUERY_SERVICE_ACCOUNT_FILE_PATH", "/secrets/env.json");
            std::env::set_var("BIGQUERY_PROJECT", "analytics");
        }
        let config = JobConfig::from_env().unwrap();
        let settings = config.bigquery_settings(Some(PathBuf::from("/tmp/cli.json")));
        assert_eq!(settings.service_account_file, Some(PathBuf::from("/tmp/cli.json")));
        assert_eq!(settings.job_project.as_deref(), Some("analytics"));

        let settings = config.bigquery_settings(None);
        assert_eq!(
            settings.service_account_file,
            Some(PathBuf::from("/secrets/env.json"))
        );
    }
}
