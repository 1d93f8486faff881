//! Backoff for read-only remote calls that fail with transient errors.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use drivesync_common::Result;

/// Retry policy. Delays double from `initial_delay` up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Randomize each delay within its upper half.
    pub jitter: bool,
}

impl RetryConfig {
    /// Policy with `max_retries` retries and the default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Override the delay bounds.
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Use exact delays.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let delay = self.initial_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter {
            return delay;
        }
        let half = delay / 2;
        half + half.mul_f64(rand::random::<f64>())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Runs idempotent remote calls, retrying those that fail transiently.
///
/// Only errors reporting [`drivesync_common::Error::is_transient`] are
/// retried; anything else is returned on first sight.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, labelled `what` in logs, until it succeeds, fails
    /// permanently or runs out of retries.
    pub async fn execute<F, Fut, T>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!("{} succeeded after {} retries", what, retries);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && retries < self.config.max_retries => err,
                Err(err) => return Err(err),
            };

            let delay = self.config.delay_before(retries);
            retries += 1;
            warn!(
                "{} failed ({}), retry {}/{} in {:?}",
                what, err, retries, self.config.max_retries, delay
            );
            sleep(delay).await;
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
