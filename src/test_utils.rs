// src/test_utils.rs

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, CircuitBreakerConfig, ResilienceConfig, RetryPolicyConfig};
use crate::error::{ResilienceError, Result};

/// Scripted remote operation that fails a fixed number of times, then succeeds.
///
/// Invocations are counted when the returned future is polled, so calls
/// rejected by an open breaker are not counted.
#[derive(Debug, Clone)]
pub struct FlakyOperation {
    calls: Arc<AtomicUsize>,
    failures_before_success: usize,
    failure: ResilienceError,
}

impl FlakyOperation {
    pub fn succeeding() -> Self {
        Self::with_failures(0)
    }

    pub fn always_failing() -> Self {
        Self::with_failures(usize::MAX)
    }

    pub fn with_failures(failures: usize) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            failures_before_success: failures,
            failure: ResilienceError::Operation("Simulated failure".to_string()),
        }
    }

    pub fn failing_with(mut self, failure: ResilienceError) -> Self {
        self.failure = failure;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the 1-based invocation number on success
    pub fn invoke(&self) -> impl Future<Output = Result<usize>> + Send + 'static {
        let calls = Arc::clone(&self.calls);
        let failures = self.failures_before_success;
        let failure = self.failure.clone();

        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                Err(failure)
            } else {
                Ok(n)
            }
        }
    }
}

pub fn breaker_config(
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        recovery_timeout,
        success_threshold,
        call_timeout: Duration::from_secs(30),
    }
}

pub fn no_jitter_policy(max_attempts: usize, base_delay: Duration) -> RetryPolicyConfig {
    RetryPolicyConfig {
        max_attempts,
        base_delay,
        max_delay: Duration::from_secs(60),
        backoff_factor: 2.0,
        jitter_enabled: false,
    }
}

/// Registry/cache configuration without background tasks
pub fn test_config() -> ResilienceConfig {
    ResilienceConfig {
        cache: CacheConfig {
            use_background_task: false,
            ..CacheConfig::default()
        },
        ..ResilienceConfig::default()
    }
}
