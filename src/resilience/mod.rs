// src/resilience/mod.rs
//! Resilience features for remote data access.
//!
//! This module provides the failure-handling layers that sit between the
//! data-fetching code and the remote statistics API:
//!
//! 1. **Circuit Breaking** - Fail fast while a service is known to be down
//! 2. **Retry with Exponential Backoff** - Smart retries for transient failures
//! 3. **Registry** - One breaker per service, named retry policies, and failure telemetry

mod circuit_breaker;
mod registry;
mod retry_policy;

#[cfg(test)]
mod tests;

// Re-export key components
pub use circuit_breaker::{BreakerMetrics, BreakerTotals, CircuitBreaker, CircuitState};
pub use registry::{ErrorRecord, HealthSnapshot, ResilienceRegistry, ServiceClient};
pub use retry_policy::RetryPolicy;
