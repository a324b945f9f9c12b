// for error definitions
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    /// Returned by an open circuit breaker before its recovery timeout elapses
    #[error("Circuit breaker '{service}' is OPEN - service unavailable")]
    ServiceUnavailable { service: String },

    /// The protected operation ran past its call timeout or reported one itself
    #[error("Operation on '{service}' timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    /// The protected operation could not reach the remote service
    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    /// Any other failure reported by the protected operation
    #[error("Operation failed: {0}")]
    Operation(String),

    /// Every attempt allowed by a retry policy failed
    #[error("All {attempts} retry attempts failed: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<ResilienceError>,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cached value (de)serialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),
}

impl ResilienceError {
    /// Whether this failure counts towards a breaker's timeout total.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ResilienceError::Timeout { .. } | ResilienceError::Connectivity(_)
        )
    }

    /// Stable tag recorded in the error history.
    pub fn kind(&self) -> &'static str {
        match self {
            ResilienceError::ServiceUnavailable { .. } => "service_unavailable",
            ResilienceError::Timeout { .. } => "timeout",
            ResilienceError::Connectivity(_) => "connectivity_failure",
            ResilienceError::Operation(_) => "operation_failed",
            ResilienceError::RetryExhausted { .. } => "retry_exhausted",
            ResilienceError::Config(_) => "config",
            ResilienceError::Serialization(_) => "serialization",
        }
    }

    /// The innermost error, looking through `RetryExhausted` wrappers.
    pub fn root_cause(&self) -> &ResilienceError {
        match self {
            ResilienceError::RetryExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Text the calling layer can show to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ResilienceError::ServiceUnavailable { .. } => {
                "Service is temporarily unavailable. Please try again later."
            }
            ResilienceError::RetryExhausted { .. } => {
                "Service is experiencing issues. Please try again later."
            }
            ResilienceError::Timeout { .. } | ResilienceError::Connectivity(_) => {
                "The data service is not responding. Please try again later."
            }
            _ => "Something went wrong while loading data.",
        }
    }
}

// implement conversions from serde_json::Error to ResilienceError
impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        ResilienceError::Serialization(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, ResilienceError>;
