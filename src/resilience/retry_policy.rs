use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::debug;

use crate::config::RetryPolicyConfig;
use crate::error::{ResilienceError, Result};

/// Exponential backoff retry policy.
///
/// Stateless apart from its configuration, so one instance is shared by every
/// caller that resolves the same policy name.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    name: String,
    config: RetryPolicyConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    pub fn new(name: impl Into<String>, config: RetryPolicyConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// Delay after the zero-based `attempt` failed, before jitter:
    /// `min(base_delay * backoff_factor^attempt, max_delay)`
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_nanos = self.config.base_delay.as_nanos() as f64;
        let backoff_nanos = base_nanos * self.config.backoff_factor.powi(exp);

        // Also catches NaN and overflowed powers
        if !(backoff_nanos < self.config.max_delay.as_nanos() as f64) {
            return self.config.max_delay;
        }

        let nanos = backoff_nanos.max(0.0).round();
        if nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            // Beyond u64 nanoseconds, fall back to float seconds
            Duration::try_from_secs_f64(nanos / 1e9)
                .map_or(self.config.max_delay, |delay| delay.min(self.config.max_delay))
        }
    }

    /// Delay actually slept after `attempt` failed, jitter included
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let delay = self.backoff_delay(attempt);

        if self.config.jitter_enabled {
            // random value between 50% and 100% of the calculated backoff
            let jitter = rand::random::<f64>() * 0.5 + 0.5;
            delay.mul_f64(jitter)
        } else {
            delay
        }
    }

    /// Invoke `operation` until it succeeds or `max_attempts` invocations have failed.
    ///
    /// The operation is expected to be breaker-protected already; a breaker
    /// that opens mid-loop makes later attempts fail fast rather than reach
    /// the remote service. The final failure is wrapped in
    /// [`ResilienceError::RetryExhausted`].
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if attempt + 1 >= max_attempts {
                debug!(
                    policy = %self.name,
                    attempts = max_attempts,
                    error = %error,
                    "Retry attempts exhausted"
                );
                return Err(ResilienceError::RetryExhausted {
                    attempts: max_attempts,
                    source: Box::new(error),
                });
            }

            let delay = self.delay_for(attempt);
            debug!(
                policy = %self.name,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, backing off"
            );
            time::sleep(delay).await;
            attempt += 1;
        }
    }
}
