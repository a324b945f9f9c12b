// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ResilienceError, Result};

/// Name of the retry policy used for ordinary remote API calls
pub const API_CALLS_POLICY: &str = "api_calls";

/// Name of the retry policy used for operations that must not give up early
pub const CRITICAL_OPERATIONS_POLICY: &str = "critical_operations";

/// Configuration for a per-service circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls after the last failure
    #[serde(default = "default_recovery_timeout", with = "duration_serde")]
    pub recovery_timeout: Duration,

    /// Successes needed in half-open state to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Upper bound on a single protected invocation
    #[serde(default = "default_call_timeout", with = "duration_serde")]
    pub call_timeout: Duration,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_success_threshold() -> u32 {
    2
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            success_threshold: default_success_threshold(),
            call_timeout: default_call_timeout(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Reject configurations with any zero field
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::Config(
                "failure_threshold must be greater than zero".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ResilienceError::Config(
                "success_threshold must be greater than zero".to_string(),
            ));
        }
        if self.recovery_timeout.is_zero() {
            return Err(ResilienceError::Config(
                "recovery_timeout must be greater than zero".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(ResilienceError::Config(
                "call_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a named retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Total invocations, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the second attempt
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Ceiling applied before jitter
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied per attempt
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Scale each delay by a random factor in [0.5, 1.0]
    #[serde(default = "default_jitter_enabled")]
    pub jitter_enabled: bool,
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter_enabled() -> bool {
    true
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            backoff_factor: default_backoff_factor(),
            jitter_enabled: default_jitter_enabled(),
        }
    }
}

impl RetryPolicyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::Config(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.base_delay.is_zero() {
            return Err(ResilienceError::Config(
                "base_delay must be greater than zero".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(ResilienceError::Config(format!(
                "max_delay ({:?}) must not be below base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ResilienceError::Config(format!(
                "backoff_factor must be a finite value >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// The built-in policy catalog
    pub fn catalog() -> HashMap<String, RetryPolicyConfig> {
        let mut policies = HashMap::new();
        policies.insert(
            API_CALLS_POLICY.to_string(),
            RetryPolicyConfig {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                backoff_factor: 2.0,
                ..RetryPolicyConfig::default()
            },
        );
        policies.insert(
            CRITICAL_OPERATIONS_POLICY.to_string(),
            RetryPolicyConfig {
                max_attempts: 5,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
                ..RetryPolicyConfig::default()
            },
        );
        policies
    }
}

/// Configuration for the TTL cache store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,

    /// Prefix for keys built with `CacheStore::cache_key`
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_key_prefix() -> String {
    "fpl".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(ResilienceError::Config(
                "max_entries must be greater than zero".to_string(),
            ));
        }
        if self.use_background_task && self.cleanup_interval.is_zero() {
            return Err(ResilienceError::Config(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for the resilience subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Breaker settings used when a service's breaker is first created
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,

    /// Policy used for names missing from `policies`
    #[serde(default)]
    pub default_policy: RetryPolicyConfig,

    /// Named retry policies
    #[serde(default = "RetryPolicyConfig::catalog")]
    pub policies: HashMap<String, RetryPolicyConfig>,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Capacity of the error history ring
    #[serde(default = "default_error_history_capacity")]
    pub error_history_capacity: usize,

    /// How many recent errors a health snapshot reports
    #[serde(default = "default_recent_errors_reported")]
    pub recent_errors_reported: usize,
}

fn default_error_history_capacity() -> usize {
    100
}

fn default_recent_errors_reported() -> usize {
    10
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            default_policy: RetryPolicyConfig::default(),
            policies: RetryPolicyConfig::catalog(),
            cache: CacheConfig::default(),
            error_history_capacity: default_error_history_capacity(),
            recent_errors_reported: default_recent_errors_reported(),
        }
    }
}

impl ResilienceConfig {
    pub fn validate(&self) -> Result<()> {
        self.breaker.validate()?;
        self.default_policy.validate()?;
        for (name, policy) in &self.policies {
            policy.validate().map_err(|e| match e {
                ResilienceError::Config(msg) => {
                    ResilienceError::Config(format!("policy '{}': {}", name, msg))
                }
                other => other,
            })?;
        }
        self.cache.validate()?;
        if self.error_history_capacity == 0 {
            return Err(ResilienceError::Config(
                "error_history_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ResilienceConfig = serde_json::from_str(json)
            .map_err(|e| ResilienceError::Config(format!("invalid JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from `FPL_*` environment variables.
    ///
    /// Durations are given in milliseconds. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = ResilienceConfig::default();

        if let Some(v) = env_parse::<u32>("FPL_BREAKER_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("FPL_BREAKER_RECOVERY_TIMEOUT_MS")? {
            config.breaker.recovery_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u32>("FPL_BREAKER_SUCCESS_THRESHOLD")? {
            config.breaker.success_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("FPL_BREAKER_CALL_TIMEOUT_MS")? {
            config.breaker.call_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<usize>("FPL_CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = v;
        }
        if let Some(v) = env_parse::<u64>("FPL_CACHE_CLEANUP_INTERVAL_MS")? {
            config.cache.cleanup_interval = Duration::from_millis(v);
        }
        if let Ok(prefix) = env::var("FPL_CACHE_KEY_PREFIX") {
            config.cache.key_prefix = prefix;
        }
        if let Some(v) = env_parse::<usize>("FPL_ERROR_HISTORY_CAPACITY")? {
            config.error_history_capacity = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ResilienceError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis())
            .map_err(|_| serde::ser::Error::custom("duration too large for milliseconds"))?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ResilienceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.error_history_capacity, 100);
        assert!(config.policies.contains_key(API_CALLS_POLICY));
        assert!(config.policies.contains_key(CRITICAL_OPERATIONS_POLICY));
    }

    #[test]
    fn test_zero_fields_are_rejected() {
        let breaker = CircuitBreakerConfig {
            failure_threshold: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(matches!(breaker.validate(), Err(ResilienceError::Config(_))));

        let breaker = CircuitBreakerConfig {
            call_timeout: Duration::ZERO,
            ..CircuitBreakerConfig::default()
        };
        assert!(breaker.validate().is_err());

        let policy = RetryPolicyConfig {
            max_attempts: 0,
            ..RetryPolicyConfig::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ResilienceConfig::from_json(
            r#"{
                "breaker": { "failure_threshold": 3, "recovery_timeout": 1500 },
                "cache": { "use_background_task": false }
            }"#,
        )
        .unwrap();

        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_millis(1500));
        assert_eq!(config.breaker.success_threshold, 2);
        assert!(!config.cache.use_background_task);
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.policies.len(), 2);
    }

    #[test]
    fn test_from_json_rejects_invalid_policy() {
        let result = ResilienceConfig::from_json(
            r#"{ "policies": { "broken": { "max_attempts": 0 } } }"#,
        );
        match result {
            Err(ResilienceError::Config(msg)) => assert!(msg.contains("broken")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(CircuitBreakerConfig::default()).unwrap();
        assert_eq!(json["recovery_timeout"], 60_000);
        assert_eq!(json["call_timeout"], 30_000);

        let huge = CircuitBreakerConfig {
            recovery_timeout: Duration::MAX,
            ..CircuitBreakerConfig::default()
        };
        assert!(serde_json::to_value(huge).is_err());
    }

    #[test]
    fn test_catalog_values() {
        let catalog = RetryPolicyConfig::catalog();
        let critical = &catalog[CRITICAL_OPERATIONS_POLICY];
        assert_eq!(critical.max_attempts, 5);
        assert_eq!(critical.base_delay, Duration::from_millis(500));
        assert_eq!(critical.max_delay, Duration::from_secs(10));

        let api = &catalog[API_CALLS_POLICY];
        assert_eq!(api.max_attempts, 3);
        assert_eq!(api.max_delay, Duration::from_secs(60));
    }
}
