//! Test helper utilities for resilient-client integration tests
//!
//! Shared fixtures for building clients against a wiremock server.
//!
//! IMPORTANT: These helpers are test-only and should NEVER be used in production code.

// Functions are used across different test files
#![allow(dead_code)]

use resilient_client::{ApiClient, ApiClientConfig, CircuitBreakerConfig, RetryPolicy};
use std::time::Duration;
use wiremock::MockServer;

/// Retry policy with millisecond delays so retry tests stay fast
pub fn create_fast_retry_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_factor: 2.0,
        jitter: false,
        on_retry: None,
    }
}

/// Standard configuration pointed at the mock server
pub fn create_test_config(server: &MockServer, max_retries: u32) -> ApiClientConfig {
    ApiClientConfig {
        base_url: Some(server.uri()),
        timeout: Duration::from_secs(5),
        retry_policy: create_fast_retry_policy(max_retries),
        ..ApiClientConfig::standard()
    }
}

/// Client against the mock server with a fast retry policy
pub fn create_test_client(server: &MockServer, max_retries: u32) -> ApiClient {
    ApiClient::new(create_test_config(server, max_retries)).expect("test config is valid")
}

/// Client whose calls go through a circuit breaker
pub fn create_breaker_client(
    server: &MockServer,
    failure_threshold: u32,
    recovery_timeout: Duration,
) -> ApiClient {
    let config = create_test_config(server, 0).with_circuit_breaker(CircuitBreakerConfig {
        failure_threshold,
        recovery_timeout,
    });
    ApiClient::new(config).expect("test config is valid")
}
