use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::{self, Instant};
use tracing::debug;

use crate::breaker_event;
use crate::config::CircuitBreakerConfig;
use crate::error::{ResilienceError, Result};

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are failing and not being sent
    Open,
    /// Circuit is partially open, letting trial requests through to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Lifetime counters of a breaker. Never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakerTotals {
    pub requests: u64,
    pub failures: u64,
    pub timeouts: u64,
}

/// Point-in-time view of a breaker, as reported by the health snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub totals: BreakerTotals,
    pub success_rate: f64,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Failures since the circuit last closed
    failure_count: u32,
    /// Successes since the circuit last went half-open
    success_count: u32,
    /// Monotonic instant of the last failure, drives the recovery timeout
    last_failure_at: Option<Instant>,
    /// Wall-clock time of the last failure, for reporting
    last_failure_time: Option<DateTime<Utc>>,
    totals: BreakerTotals,
}

/// Per-service circuit breaker.
///
/// All state lives behind one mutex, so concurrent callers sharing a service
/// observe a single linear sequence of transitions. The lock is never held
/// while the protected operation runs.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                last_failure_time: None,
                totals: BreakerTotals::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Counters stay meaningful even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `operation` under breaker protection.
    ///
    /// Fails fast with [`ResilienceError::ServiceUnavailable`] while the circuit
    /// is open. Otherwise the operation runs, bounded by the configured call
    /// timeout, and its outcome drives the state machine. Errors from the
    /// operation are returned unchanged.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.allow_request()?;

        let outcome = match time::timeout(self.config.call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ResilienceError::Timeout {
                service: self.name.clone(),
                timeout: self.config.call_timeout,
            }),
        };

        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Admission check. Counts the request, and moves an open circuit to
    /// half-open once the recovery timeout has passed since the last failure.
    pub fn allow_request(&self) -> Result<()> {
        let mut s = self.lock();
        s.totals.requests += 1;

        if s.state != CircuitState::Open {
            return Ok(());
        }

        let recovered = match s.last_failure_at {
            Some(at) => at.elapsed() >= self.config.recovery_timeout,
            None => true,
        };

        if recovered {
            s.state = CircuitState::HalfOpen;
            s.success_count = 0;
            breaker_event!(
                self.name,
                CircuitState::Open,
                CircuitState::HalfOpen,
                "Circuit breaker transitioning to HALF_OPEN"
            );
            Ok(())
        } else {
            debug!(service = %self.name, "Circuit breaker is OPEN, rejecting request");
            Err(ResilienceError::ServiceUnavailable {
                service: self.name.clone(),
            })
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut s = self.lock();

        match s.state {
            CircuitState::Closed => {
                // A success forgives earlier failures
                s.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                s.success_count += 1;

                if s.success_count >= self.config.success_threshold {
                    s.state = CircuitState::Closed;
                    s.failure_count = 0;
                    s.success_count = 0;
                    breaker_event!(
                        self.name,
                        CircuitState::HalfOpen,
                        CircuitState::Closed,
                        "Circuit breaker CLOSED - service recovered"
                    );
                }
            }
            CircuitState::Open => {
                // A call admitted before another caller reopened the circuit
                debug!(service = %self.name, "Ignoring success recorded while OPEN");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self, error: &ResilienceError) {
        let mut s = self.lock();

        s.totals.failures += 1;
        if error.is_timeout() {
            s.totals.timeouts += 1;
        }
        s.failure_count = s.failure_count.saturating_add(1);
        s.last_failure_at = Some(Instant::now());
        s.last_failure_time = Some(Utc::now());

        match s.state {
            CircuitState::Closed => {
                if s.failure_count >= self.config.failure_threshold {
                    s.state = CircuitState::Open;
                    breaker_event!(
                        warn,
                        self.name,
                        CircuitState::Closed,
                        CircuitState::Open,
                        "Circuit breaker OPENED after consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // One failed probe is enough to reopen
                s.state = CircuitState::Open;
                s.success_count = 0;
                breaker_event!(
                    warn,
                    self.name,
                    CircuitState::HalfOpen,
                    CircuitState::Open,
                    "Circuit breaker re-opened after failure in half-open state"
                );
            }
            CircuitState::Open => {
                // Already open; the refreshed failure time extends the recovery window
            }
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let s = self.lock();
        let success_rate = 1.0 - (s.totals.failures as f64 / s.totals.requests.max(1) as f64);

        BreakerMetrics {
            name: self.name.clone(),
            state: s.state,
            failure_count: s.failure_count,
            success_count: s.success_count,
            totals: s.totals,
            success_rate,
            last_failure_time: s.last_failure_time,
        }
    }
}
