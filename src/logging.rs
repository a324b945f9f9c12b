use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,fpl_resilience=trace
///
/// Setting LOG_FORMAT=json switches to one JSON object per line.
pub fn init() {
    INIT.call_once(|| {
        // Default to 'info' level if not specified
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(false))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true) // Useful for debugging concurrency issues
                        .with_line_number(true),
                )
                .init();
        }

        tracing::info!("Logging initialized");
    });
}

/// Macro for logging circuit breaker state transitions
#[macro_export]
macro_rules! breaker_event {
    (warn, $service:expr, $from:expr, $to:expr, $msg:literal) => {
        tracing::warn!(
            service = %$service,
            from = ?$from,
            to = ?$to,
            $msg
        )
    };
    ($service:expr, $from:expr, $to:expr, $msg:literal) => {
        tracing::info!(
            service = %$service,
            from = ?$from,
            to = ?$to,
            $msg
        )
    };
}

/// Macro for logging cache lookups
#[macro_export]
macro_rules! cache_op {
    ($operation:expr, $key:expr, $hit:expr) => {
        tracing::debug!(
            operation = $operation,
            key = %$key,
            hit = $hit,
            "Cache operation"
        )
    };
}
