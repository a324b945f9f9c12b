// library entry
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod resilience;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use cache::{CacheStats, CacheStore, CacheTtl};
pub use client::ResilientClient;
pub use config::{CacheConfig, CircuitBreakerConfig, ResilienceConfig, RetryPolicyConfig};
pub use error::{ResilienceError, Result};
pub use logging::init as init_logging;
pub use resilience::{
    CircuitBreaker, CircuitState, HealthSnapshot, ResilienceRegistry, RetryPolicy, ServiceClient,
};
