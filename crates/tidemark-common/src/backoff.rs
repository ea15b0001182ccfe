// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Exponential retry policy and an async retry helper.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Exponential backoff policy.
///
/// Delays grow as `initial * coefficient^(attempt - 1)`, capped at the
/// maximum interval when one is set. A policy without an expiration
/// interval retries forever.
#[derive(Debug, Clone)]
pub struct ExponentialRetryPolicy {
    initial_interval: Duration,
    backoff_coefficient: f64,
    maximum_interval: Option<Duration>,
    expiration_interval: Option<Duration>,
}

impl ExponentialRetryPolicy {
    /// Create a policy with the given initial interval and a 2.0 coefficient.
    pub fn new(initial_interval: Duration) -> Self {
        Self {
            initial_interval,
            backoff_coefficient: 2.0,
            maximum_interval: None,
            expiration_interval: None,
        }
    }

    /// Cap individual delays at `interval`.
    pub fn with_maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval = Some(interval);
        self
    }

    /// Stop retrying once the total elapsed time exceeds `interval`.
    pub fn with_expiration_interval(mut self, interval: Duration) -> Self {
        self.expiration_interval = Some(interval);
        self
    }

    /// Retry forever.
    pub fn without_expiration(mut self) -> Self {
        self.expiration_interval = None;
        self
    }

    /// Delay before the retry following the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let factor = self.backoff_coefficient.powi(attempt as i32 - 1);
        let delay = self.initial_interval.mul_f64(factor);
        match self.maximum_interval {
            Some(max) if delay > max => max,
            _ => delay,
        }
    }

    /// Whether a retry may still be attempted `elapsed` after the first try.
    pub fn may_retry(&self, elapsed: Duration) -> bool {
        match self.expiration_interval {
            Some(expiration) => elapsed < expiration,
            None => true,
        }
    }
}

/// Run `op` until it succeeds, a non-retryable error occurs, or the policy
/// expires. Sleeps between attempts according to the policy.
pub async fn retry<T, E, F, Fut, R>(
    policy: &ExponentialRetryPolicy,
    mut op: F,
    mut is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let started = Instant::now();
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) || !policy.may_retry(started.elapsed()) {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_cap() {
        let policy = ExponentialRetryPolicy::new(Duration::from_secs(5))
            .with_maximum_interval(Duration::from_secs(60));

        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(4), Duration::from_secs(40));
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for(12), Duration::from_secs(60));
    }

    #[test]
    fn no_expiration_always_allows_retry() {
        let policy = ExponentialRetryPolicy::new(Duration::from_secs(1)).without_expiration();
        assert!(policy.may_retry(Duration::from_secs(86_400)));
    }

    #[test]
    fn expiration_cuts_off_retries() {
        let policy = ExponentialRetryPolicy::new(Duration::from_secs(1))
            .with_expiration_interval(Duration::from_secs(30));
        assert!(policy.may_retry(Duration::from_secs(29)));
        assert!(!policy.may_retry(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_until_success() {
        let policy = ExponentialRetryPolicy::new(Duration::from_millis(1));
        let mut remaining_failures = 3;
        let result: Result<u32, &str> = retry(
            &policy,
            || {
                let fail = remaining_failures > 0;
                if fail {
                    remaining_failures -= 1;
                }
                async move { if fail { Err("transient") } else { Ok(7) } }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_non_retryable() {
        let policy = ExponentialRetryPolicy::new(Duration::from_millis(1));
        let mut calls = 0;
        let result: Result<(), &str> = retry(
            &policy,
            || {
                calls += 1;
                async { Err("fatal") }
            },
            |_| false,
        )
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls, 1);
    }
}
