use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::{CircuitBreakerConfig, ResilienceConfig};
use crate::error::{ResilienceError, Result};
use crate::resilience::circuit_breaker::{BreakerMetrics, CircuitBreaker};
use crate::resilience::retry_policy::RetryPolicy;

/// A terminal failure seen by `resilient_call`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub service_name: String,
    pub message: String,
    pub error_kind: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything a diagnostics view needs in one read
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub circuit_breakers: BTreeMap<String, BreakerMetrics>,
    pub error_counts: BTreeMap<String, u64>,
    pub recent_errors: Vec<ErrorRecord>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    policies: HashMap<String, Arc<RetryPolicy>>,
    error_counts: HashMap<String, u64>,
    /// Oldest first, bounded by `error_history_capacity`
    recent_errors: VecDeque<ErrorRecord>,
}

/// Owns one circuit breaker per service and one retry policy per policy name,
/// and keeps failure telemetry for the health view.
///
/// # Architecture
///
/// ```plaintext
/// ┌─────────────┐
/// │   Caller    │
/// └─────────────┘
///        │ resilient_call(service, policy, op)
///        ▼
/// ┌────────────────────┐     ┌───────────────┐
/// │ ResilienceRegistry │────►│ Error history │
/// └────────────────────┘     └───────────────┘
///        │
///        ▼
/// ┌─────────────┐      ┌────────────────┐      ┌───────────┐
/// │ RetryPolicy │─────►│ CircuitBreaker │─────►│ operation │
/// └─────────────┘      └────────────────┘      └───────────┘
/// ```
///
/// The registry is built once at startup and shared through an `Arc`.
#[derive(Debug)]
pub struct ResilienceRegistry {
    config: ResilienceConfig,
    state: Mutex<RegistryState>,
}

impl ResilienceRegistry {
    pub fn new(config: ResilienceConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            state: Mutex::new(RegistryState {
                recent_errors: VecDeque::with_capacity(config.error_history_capacity),
                ..RegistryState::default()
            }),
            config,
        })
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the breaker for `service`, creating it on first use.
    ///
    /// `config` only applies when the breaker is created here. A breaker that
    /// already exists keeps the configuration it was created with, and a
    /// differing `config` is logged and ignored without being validated.
    pub fn get_or_create_breaker(
        &self,
        service: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Result<Arc<CircuitBreaker>> {
        let mut state = self.lock();

        if let Some(existing) = state.breakers.get(service) {
            if let Some(config) = &config {
                if config != existing.config() {
                    warn!(
                        service = %service,
                        "Circuit breaker already exists; ignoring new configuration"
                    );
                }
            }
            return Ok(Arc::clone(existing));
        }

        let config = match config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => self.config.breaker.clone(),
        };
        debug!(service = %service, ?config, "Creating circuit breaker");
        let breaker = Arc::new(CircuitBreaker::new(service, config));
        state
            .breakers
            .insert(service.to_string(), Arc::clone(&breaker));
        Ok(breaker)
    }

    /// Return the retry policy called `name`. Unknown names resolve to the
    /// default policy, cached under the requested name.
    pub fn get_or_create_policy(&self, name: &str) -> Arc<RetryPolicy> {
        let mut state = self.lock();

        if let Some(policy) = state.policies.get(name) {
            return Arc::clone(policy);
        }

        let config = match self.config.policies.get(name) {
            Some(config) => config.clone(),
            None => {
                debug!(policy = %name, "Unknown retry policy, using default");
                self.config.default_policy.clone()
            }
        };
        let policy = Arc::new(RetryPolicy::new(name, config));
        state.policies.insert(name.to_string(), Arc::clone(&policy));
        policy
    }

    /// Run `operation` for `service` with retries under `policy`, each attempt
    /// going through the service's circuit breaker.
    ///
    /// Terminal failures are recorded in the error history before being returned.
    pub async fn resilient_call<T, F, Fut>(
        &self,
        service: &str,
        policy: &str,
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.resilient_call_with_config(service, policy, None, operation)
            .await
    }

    /// Like [`resilient_call`](Self::resilient_call), with the breaker
    /// configuration to use if this call creates the service's breaker.
    pub async fn resilient_call_with_config<T, F, Fut>(
        &self,
        service: &str,
        policy: &str,
        breaker_config: Option<CircuitBreakerConfig>,
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.get_or_create_breaker(service, breaker_config)?;
        let retry = self.get_or_create_policy(policy);

        let breaker: &CircuitBreaker = &breaker;
        let operation = &operation;
        let result = retry.execute(|| breaker.call(operation)).await;

        if let Err(e) = &result {
            self.record_error(service, e);
        }
        result
    }

    fn record_error(&self, service: &str, err: &ResilienceError) {
        error!(
            service = %service,
            kind = err.kind(),
            cause = err.root_cause().kind(),
            error = %err,
            "Resilient call failed"
        );

        let record = ErrorRecord {
            id: Uuid::new_v4(),
            service_name: service.to_string(),
            message: err.to_string(),
            error_kind: err.kind().to_string(),
            timestamp: Utc::now(),
        };

        let mut state = self.lock();
        *state.error_counts.entry(service.to_string()).or_insert(0) += 1;
        if state.recent_errors.len() >= self.config.error_history_capacity {
            state.recent_errors.pop_front();
        }
        state.recent_errors.push_back(record);
    }

    /// A handle bound to one service and retry policy
    pub fn service(self: &Arc<Self>, service: &str, policy: &str) -> ServiceClient {
        ServiceClient {
            registry: Arc::clone(self),
            service: service.to_string(),
            policy: policy.to_string(),
        }
    }

    pub fn error_count(&self, service: &str) -> u64 {
        self.lock().error_counts.get(service).copied().unwrap_or(0)
    }

    /// The whole error history, oldest first
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.lock().recent_errors.iter().cloned().collect()
    }

    pub fn health_status(&self) -> HealthSnapshot {
        let (breakers, error_counts, recent_errors) = {
            let state = self.lock();
            let skip = state
                .recent_errors
                .len()
                .saturating_sub(self.config.recent_errors_reported);
            (
                state.breakers.values().cloned().collect::<Vec<_>>(),
                state
                    .error_counts
                    .iter()
                    .map(|(k, v)| (k.clone(), *v))
                    .collect::<BTreeMap<_, _>>(),
                state.recent_errors.iter().skip(skip).cloned().collect::<Vec<_>>(),
            )
        };

        // Breaker locks are taken after the registry lock is released
        let circuit_breakers = breakers
            .iter()
            .map(|b| (b.name().to_string(), b.metrics()))
            .collect();

        HealthSnapshot {
            circuit_breakers,
            error_counts,
            recent_errors,
            timestamp: Utc::now(),
        }
    }
}

/// Resilient calls for one service under one retry policy.
///
/// Cheap to clone; every clone shares the same registry.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    registry: Arc<ResilienceRegistry>,
    service: String,
    policy: String,
}

impl ServiceClient {
    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn policy_name(&self) -> &str {
        &self.policy
    }

    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.registry
            .resilient_call(&self.service, &self.policy, operation)
            .await
    }

    pub fn breaker(&self) -> Result<Arc<CircuitBreaker>> {
        self.registry.get_or_create_breaker(&self.service, None)
    }
}
