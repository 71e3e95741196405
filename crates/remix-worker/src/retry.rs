//! Bounded retries for store writes and log suppression for the poll loop.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Backoff policy for one kind of operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub base_delay: Duration,
    /// Ceiling for a single delay.
    pub max_delay: Duration,
    /// Name used in log lines.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// The last error of an operation that never succeeded.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Run `operation` until it succeeds or the retry budget is spent.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    operation: F,
) -> Result<T, RetryExhausted<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_async_when(config, operation, |_| true).await
}

/// Like [`retry_async`], but errors rejected by `should_retry` end the loop.
pub async fn retry_async_when<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> Result<T, RetryExhausted<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut retries = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if retries < config.max_retries && should_retry(&e) => {
                retries += 1;
                let delay = config.delay_for_retry(retries);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, retries, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(RetryExhausted {
                    error: e,
                    attempts: retries + 1,
                })
            }
        }
    }
}

/// Counts consecutive failures of a recurring task and mutes its logs
/// after a threshold until it recovers.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > self.max_logged_failures {
            debug!(
                "Recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures == self.max_logged_failures + 1 {
            warn!(
                "Muting further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
        }
        self.consecutive_failures <= self.max_logged_failures
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}
