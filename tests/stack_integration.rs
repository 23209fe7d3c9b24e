//! End-to-end behavior of the composed resilience stack.

use keel::{
    Backoff, CircuitBreaker, CircuitBreakerConfig, CircuitState, Error, ErrorKind, Jitter,
    RateLimiter, RateLimiterConfig, ResilienceStack, RetryConfig, RetryPolicy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn server_error() -> Error {
    Error::new(ErrorKind::Server, "boom").with_status(500)
}

#[tokio::test]
async fn retry_recovers_within_three_attempts() {
    let retry = RetryPolicy::builder()
        .max_attempts(3)
        .unwrap()
        .backoff(Backoff::exponential(Duration::from_millis(10)))
        .with_jitter(Jitter::None)
        .build()
        .unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let start = Instant::now();
    let result = retry
        .execute(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "recovered");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // Two waits: 10 ms then 20 ms.
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[tokio::test]
async fn breaker_opens_then_half_opens_on_timeout() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 1,
        reset_timeout: Duration::from_millis(20),
        window: Duration::from_secs(60),
    });

    for _ in 0..3 {
        let _ = breaker
            .execute(|| async { Err::<(), _>(Error::network("down")) })
            .await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.allow());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(breaker.allow());
}

#[tokio::test]
async fn limiter_drains_and_refills() {
    let limiter = RateLimiter::new(RateLimiterConfig {
        max_requests: 10,
        window: Duration::from_millis(100),
        queue_enabled: false,
        ..RateLimiterConfig::default()
    });

    for _ in 0..10 {
        limiter.acquire().await.unwrap();
    }
    assert!(limiter.tokens() < 1.0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(limiter.tokens(), 10.0);
}

#[tokio::test]
async fn stack_composes_limiter_breaker_and_retry() {
    let retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        jitter_enabled: false,
        ..RetryConfig::default()
    };
    let stack = ResilienceStack::builder()
        .retry_config(&retry)
        .unwrap()
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 10,
            ..CircuitBreakerConfig::default()
        })
        .rate_limiter(RateLimiterConfig {
            max_requests: 100,
            window: Duration::from_secs(1),
            ..RateLimiterConfig::default()
        })
        .build()
        .unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let result = stack
        .execute(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::new(ErrorKind::RateLimit, "throttled")
                        .with_status(429)
                        .with_retry_after(Duration::from_millis(5)))
                } else {
                    Ok(204)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 204);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    // The breaker saw one failure and one success; still closed.
    assert_eq!(
        stack.circuit_breaker().unwrap().state(),
        CircuitState::Closed
    );
}
