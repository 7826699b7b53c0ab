//! Sliding-window rate limiter for outbound remote calls.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Allows at most `rate_limit` calls per `period`. Callers over the limit
/// sleep until the oldest recorded call leaves the window.
///
/// The lock is held across the sleep, so concurrent callers queue up in
/// order.
#[derive(Debug)]
pub struct Throttler {
    rate_limit: usize,
    period: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl Throttler {
    pub fn new(rate_limit: usize, period: Duration) -> Self {
        Self {
            rate_limit: rate_limit.max(1),
            period,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn rate_limit(&self) -> usize {
        self.rate_limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn acquire(&self) {
        let mut calls = self.calls.lock().await;
        prune(&mut calls, Instant::now(), self.period);

        if calls.len() >= self.rate_limit {
            if let Some(oldest) = calls.front().copied() {
                let wait = self.period.saturating_sub(Instant::now() - oldest);
                debug!("Throttling remote call for {:?}", wait);
                tokio::time::sleep(wait).await;
            }
            prune(&mut calls, Instant::now(), self.period);
        }

        calls.push_back(Instant::now());
    }
}

fn prune(calls: &mut VecDeque<Instant>, now: Instant, period: Duration) {
    while calls.front().is_some_and(|t| now - *t >= period) {
        calls.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn calls_under_the_limit_do_not_wait() {
        let throttler = Throttler::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            throttler.acquire().await;
        }
        assert_eq!(Instant::now() - start, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn call_over_the_limit_waits_for_window() {
        let throttler = Throttler::new(2, Duration::from_secs(10));
        let start = Instant::now();
        throttler.acquire().await;
        tokio::time::advance(Duration::from_secs(4)).await;
        throttler.acquire().await;
        throttler.acquire().await;
        // Third call waits until the first one (t=0) leaves the window.
        assert_eq!(Instant::now() - start, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_window() {
        let throttler = Arc::new(Throttler::new(2, Duration::from_secs(5)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = throttler.clone();
                tokio::spawn(async move { t.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(Instant::now() - start >= Duration::from_secs(5));
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        assert_eq!(Throttler::new(0, Duration::from_secs(1)).rate_limit(), 1);
    }
}
