// src/tests/client_tests.rs

use std::time::Duration;
use tokio::time;
use tokio_test::assert_ok;
use tracing_test::traced_test;

use crate::cache::CacheTtl;
use crate::client::ResilientClient;
use crate::config::{ResilienceConfig, API_CALLS_POLICY};
use crate::error::ResilienceError;
use crate::resilience::CircuitState;
use crate::test_utils::{breaker_config, no_jitter_policy, test_config, FlakyOperation};

const SERVICE: &str = "fpl_api";

fn create_test_client() -> ResilientClient {
    let mut config = test_config();
    config.breaker = breaker_config(3, Duration::from_secs(60), 2);
    config.policies.insert(
        API_CALLS_POLICY.to_string(),
        no_jitter_policy(3, Duration::from_millis(100)),
    );
    ResilientClient::new(config).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_fetch_serves_second_call_from_cache() {
    let client = create_test_client();
    let op = FlakyOperation::succeeding();

    let first = assert_ok!(
        client
            .fetch("bootstrap", CacheTtl::Long, SERVICE, API_CALLS_POLICY, || op.invoke())
            .await
    );
    let second = assert_ok!(
        client
            .fetch("bootstrap", CacheTtl::Long, SERVICE, API_CALLS_POLICY, || op.invoke())
            .await
    );

    assert_eq!(first, second);
    assert_eq!(op.calls(), 1);
    assert_eq!(client.cache_stats().hits, 1);

    // The cache hit never reached the breaker
    let health = client.health();
    assert_eq!(health.circuit_breakers[SERVICE].totals.requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_retries_then_caches() {
    let client = create_test_client();
    let op = FlakyOperation::with_failures(2);

    let value = assert_ok!(
        client
            .fetch("players", CacheTtl::Short, SERVICE, API_CALLS_POLICY, || op.invoke())
            .await
    );

    assert_eq!(value, 3);
    assert_eq!(client.cache().get::<usize>("players"), Some(3));
    assert!(client.health().recent_errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_refetches_after_ttl() {
    let client = create_test_client();
    let op = FlakyOperation::succeeding();

    assert_ok!(
        client
            .fetch("live", CacheTtl::VeryShort, SERVICE, API_CALLS_POLICY, || op.invoke())
            .await
    );
    time::advance(Duration::from_secs(61)).await;
    let refreshed = assert_ok!(
        client
            .fetch("live", CacheTtl::VeryShort, SERVICE, API_CALLS_POLICY, || op.invoke())
            .await
    );

    assert_eq!(refreshed, 2);
    assert_eq!(op.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_cache_forces_refetch() {
    let client = create_test_client();
    let op = FlakyOperation::succeeding();

    assert_ok!(
        client
            .fetch("teams", CacheTtl::Permanent, SERVICE, API_CALLS_POLICY, || op.invoke())
            .await
    );
    client.clear_cache();
    assert_ok!(
        client
            .fetch("teams", CacheTtl::Permanent, SERVICE, API_CALLS_POLICY, || op.invoke())
            .await
    );

    assert_eq!(op.calls(), 2);
    assert_eq!(client.cache_stats().invalidations, 1);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_failed_fetch_is_recorded_and_not_cached() {
    let client = create_test_client();
    let op = FlakyOperation::always_failing().failing_with(ResilienceError::Timeout {
        service: SERVICE.to_string(),
        timeout: Duration::from_secs(30),
    });

    let result: crate::Result<usize> = client
        .fetch("fixtures", CacheTtl::Long, SERVICE, API_CALLS_POLICY, || op.invoke())
        .await;

    let err = match result {
        Err(err) => err,
        Ok(v) => panic!("expected failure, got {}", v),
    };
    assert_eq!(err.kind(), "retry_exhausted");
    assert_eq!(
        err.user_message(),
        "Service is experiencing issues. Please try again later."
    );
    assert!(client.cache().is_empty());

    let health = client.health();
    assert_eq!(health.error_counts[SERVICE], 1);
    assert_eq!(health.circuit_breakers[SERVICE].state, CircuitState::Open);
    assert_eq!(health.circuit_breakers[SERVICE].totals.timeouts, 3);
    assert!(logs_contain("Circuit breaker OPENED"));
}

#[tokio::test(start_paused = true)]
async fn test_cached_value_is_served_while_circuit_is_open() {
    let client = create_test_client();
    let good = FlakyOperation::succeeding();
    let bad = FlakyOperation::always_failing();

    assert_ok!(
        client
            .fetch("bootstrap", CacheTtl::Long, SERVICE, API_CALLS_POLICY, || good.invoke())
            .await
    );
    // Open the breaker through another key
    let opened: crate::Result<usize> = client
        .fetch("players", CacheTtl::Long, SERVICE, API_CALLS_POLICY, || bad.invoke())
        .await;
    assert!(opened.is_err());
    assert_eq!(
        client.health().circuit_breakers[SERVICE].state,
        CircuitState::Open
    );

    let cached = assert_ok!(
        client
            .fetch("bootstrap", CacheTtl::Long, SERVICE, API_CALLS_POLICY, || good.invoke())
            .await
    );
    assert_eq!(cached, 1);
    assert_eq!(good.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_service_recovers_after_recovery_timeout() {
    let client = create_test_client();
    let service = client.service(SERVICE, API_CALLS_POLICY);
    let flaky = FlakyOperation::with_failures(3);

    // Three failures open the breaker
    assert!(service.call(|| flaky.invoke()).await.is_err());
    assert_eq!(assert_ok!(service.breaker()).state(), CircuitState::Open);

    time::advance(Duration::from_secs(61)).await;

    // Probe, then a second success closes the circuit
    assert_ok!(service.call(|| flaky.invoke()).await);
    assert_eq!(assert_ok!(service.breaker()).state(), CircuitState::HalfOpen);
    assert_ok!(service.call(|| flaky.invoke()).await);
    assert_eq!(assert_ok!(service.breaker()).state(), CircuitState::Closed);
}

#[test]
fn test_client_rejects_invalid_config() {
    let mut config = ResilienceConfig::default();
    config.breaker.failure_threshold = 0;
    config.cache.use_background_task = false;

    assert!(matches!(
        ResilientClient::new(config),
        Err(ResilienceError::Config(_))
    ));
}
