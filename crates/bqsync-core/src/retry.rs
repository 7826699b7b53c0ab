//! Exponential backoff retry keyed on transient failures.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::SyncError;

/// Retry settings for a whole sync (or query) call.
///
/// The delay before attempt `n + 1` is `multiplier * 2^(n-1)` clamped into
/// `[min_delay, max_delay]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            multiplier: Duration::from_secs(1),
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self.multiplier.saturating_mul(1u32 << exponent);
        raw.clamp(self.min_delay, self.max_delay.max(self.min_delay))
    }
}

/// Run `attempt_fn` until it succeeds, fails with a non-transient error, or
/// the policy's attempt ceiling is reached. The last error is returned.
///
/// `on_retry` runs once per scheduled retry, before the sleep.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    target: &str,
    mut on_retry: impl FnMut(u32),
    mut attempt_fn: F,
) -> Result<T, SyncError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => {
                error!("{} failed for {}: {}", operation, target, err);
                return Err(err);
            }
            Err(err) if attempt >= max_attempts => {
                error!(
                    "{} failed for {} after {} attempts: {}",
                    operation, target, attempt, err
                );
                return Err(err);
            }
            Err(err) => {
                let wait = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    wait_secs = wait.as_secs_f64(),
                    error = %err,
                    "{} failed for {}, retrying",
                    operation,
                    target
                );
                on_retry(attempt);
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
