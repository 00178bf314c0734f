//! Bounded retry with exponential backoff.
//!
//! The retry engine only knows about attempts and delays: it contains no
//! panic recovery, which is the worker loop's job.

use crate::error::{PoolError, PoolResult};
use crate::metrics::MetricsCollector;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How many times a task is processed and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` below 1 is treated as 1.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Total attempts, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the second attempt
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Backoff to wait before `attempt` (1-based).
    ///
    /// Zero for the first attempt, then `base_delay * 2^(attempt - 2)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `operation` until it succeeds or the attempts are used up.
    ///
    /// `operation` receives the 1-based attempt number. Cancelling `token`
    /// while waiting between attempts aborts with [`PoolError::Cancelled`].
    /// When every attempt fails the last error is returned wrapped in
    /// [`PoolError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(
        &self,
        token: &CancellationToken,
        metrics: &dyn MetricsCollector,
        mut operation: F,
    ) -> PoolResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PoolResult<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = self.delay_for(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before next attempt"
                );

                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(PoolError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                metrics.record_retry_attempt(attempt);
            }

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "Task succeeded after retry");
                        metrics.record_retry_success(attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    tracing::debug!(attempt, max_attempts = self.max_attempts, error = %e, "Attempt failed");
                    last_error = Some(e);
                }
            }
        }

        if self.max_attempts > 1 {
            metrics.record_retry_exhausted(self.max_attempts);
        }

        Err(PoolError::RetriesExhausted {
            attempts: self.max_attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| PoolError::processor("no attempt was made")),
            ),
        })
    }
}
