//! Pre-composed resilience profiles.
//!
//! Sensible starting points for common SDK shapes, mirroring how the
//! individual clients configure their stacks. Each function returns a
//! fresh stack; share breaker or limiter instances across stacks via the
//! builder when isolation domains overlap.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::rate_limit::RateLimiterConfig;
use crate::retry::RetryConfig;
use crate::stack::ResilienceStack;
use std::time::Duration;

/// Third-party API default: conservative retry, breaker, fail-fast limiter.
pub fn external_api() -> ResilienceStack {
    let retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(30),
        ..RetryConfig::default()
    };
    ResilienceStack::builder()
        .retry_config(&retry)
        .expect("external_api retry config is valid")
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            window: Duration::from_secs(60),
        })
        .rate_limiter(RateLimiterConfig {
            max_requests: 60,
            window: Duration::from_secs(60),
            queue_enabled: false,
            ..RateLimiterConfig::default()
        })
        .build()
        .expect("external_api stack is valid")
}

/// Bursty workloads: queued limiter smooths spikes instead of failing.
pub fn bursty_api() -> ResilienceStack {
    let retry = RetryConfig {
        max_attempts: 4,
        initial_delay: Duration::from_millis(250),
        ..RetryConfig::default()
    };
    ResilienceStack::builder()
        .retry_config(&retry)
        .expect("bursty_api retry config is valid")
        .circuit_breaker(CircuitBreakerConfig::default())
        .rate_limiter(RateLimiterConfig {
            max_requests: 120,
            window: Duration::from_secs(60),
            queue_enabled: true,
            max_queue: 512,
            ..RateLimiterConfig::default()
        })
        .build()
        .expect("bursty_api stack is valid")
}

/// Single attempt, no breaker, no limiter. For tests and callers that
/// handle failures themselves.
pub fn passthrough() -> ResilienceStack {
    let retry = RetryConfig {
        max_attempts: 1,
        jitter_enabled: false,
        ..RetryConfig::default()
    };
    ResilienceStack::builder()
        .retry_config(&retry)
        .expect("passthrough retry config is valid")
        .build()
        .expect("passthrough stack is valid")
}
