//! Circuit breaker with a rolling failure window.
//!
//! State machine:
//! Closed → Open when the window holds `failure_threshold` failures;
//! Open → HalfOpen once `reset_timeout` elapses; HalfOpen → Closed after
//! `success_threshold` consecutive successes, or back to Open on any
//! failure. Transitions are serialized behind a single lock, and only one
//! half-open probe runs at a time.

use crate::clock::{Clock, MonotonicClock};
use crate::error::{Error, ErrorKind};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within `window` required to trip the breaker.
    pub failure_threshold: usize,
    /// Consecutive half-open successes required to close.
    pub success_threshold: usize,
    /// Time the breaker stays open before probing.
    pub reset_timeout: Duration,
    /// Width of the rolling failure window.
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Failure timestamps (clock millis) within the rolling window.
    failures: VecDeque<u64>,
    half_open_successes: usize,
    opened_at: u64,
    probe_in_flight: bool,
}

/// Shared-state circuit breaker; clones observe the same circuit.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerInner>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                half_open_successes: 0,
                opened_at: 0,
                probe_in_flight: false,
            })),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current state, after applying any due Open → HalfOpen transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Whether a call would currently be admitted.
    ///
    /// False only when the (refreshed) state is Open.
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state != CircuitState::Open
    }

    /// Reset to Closed, clearing all recorded failures.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.half_open_successes = 0;
        inner.probe_in_flight = false;
    }

    /// Run `operation` under the breaker.
    ///
    /// Refuses with `circuit_open` when the circuit is Open, or when a
    /// half-open probe is already in flight. Otherwise delegates and
    /// records the outcome.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, Error>
    where
        T: Send,
        Fut: Future<Output = Result<T, Error>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let probing = {
            let mut inner = self.lock();
            self.refresh(&mut inner);
            match inner.state {
                CircuitState::Open => {
                    let elapsed = self.clock.now_millis().saturating_sub(inner.opened_at);
                    let remaining = self
                        .config
                        .reset_timeout
                        .saturating_sub(Duration::from_millis(elapsed));
                    return Err(refusal(inner.failures.len()).with_retry_after(remaining));
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        return Err(refusal(inner.failures.len()));
                    }
                    inner.probe_in_flight = true;
                    true
                }
                CircuitState::Closed => false,
            }
        };

        let result = operation().await;

        let mut inner = self.lock();
        if probing {
            inner.probe_in_flight = false;
        }
        match &result {
            Ok(_) => self.on_success(&mut inner),
            // A cancelled call says nothing about downstream health.
            Err(e) if e.kind() == ErrorKind::Cancelled => {}
            Err(_) => self.on_failure(&mut inner),
        }
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply the Open → HalfOpen transition when the reset timeout has
    /// elapsed, and age out failures that left the window.
    fn refresh(&self, inner: &mut BreakerInner) {
        let now = self.clock.now_millis();
        let window = self.config.window.as_millis() as u64;
        while let Some(&oldest) = inner.failures.front() {
            if now.saturating_sub(oldest) > window {
                let _ = inner.failures.pop_front();
            } else {
                break;
            }
        }

        if inner.state == CircuitState::Open {
            let elapsed = now.saturating_sub(inner.opened_at);
            if elapsed >= self.config.reset_timeout.as_millis() as u64 {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
                inner.probe_in_flight = false;
                tracing::info!("circuit breaker half-open, probing");
            }
        }
    }

    fn on_success(&self, inner: &mut BreakerInner) {
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.half_open_successes = 0;
                    tracing::info!("circuit breaker closed");
                }
            }
            // Closed successes do not decrement the window; failures age
            // out as their timestamps expire.
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut BreakerInner) {
        let now = self.clock.now_millis();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = now;
                tracing::warn!("circuit breaker probe failed, reopening");
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                if inner.failures.len() >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = now;
                    tracing::error!(
                        failures = inner.failures.len(),
                        threshold = self.config.failure_threshold,
                        "circuit breaker open"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }
}

fn refusal(failure_count: usize) -> Error {
    Error::new(
        ErrorKind::CircuitOpen,
        format!("circuit breaker open after {failure_count} recent failures"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(threshold: usize, reset: Duration) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            success_threshold: 1,
            reset_timeout: reset,
            window: Duration::from_secs(60),
        })
        .with_clock(clock.clone());
        (breaker, clock)
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), Error> {
        b.execute(|| async { Err::<(), _>(Error::network("down")) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, Error> {
        b.execute(|| async { Ok::<_, Error>(42) }).await
    }

    #[tokio::test]
    async fn starts_closed_and_admits_calls() {
        let (b, _) = breaker(3, Duration::from_secs(10));
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.allow());
        assert_eq!(succeed(&b).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let (b, _) = breaker(3, Duration::from_secs(10));
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allow());

        let err = succeed(&b).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert!(err.retry_after().is_some());
    }

    #[tokio::test]
    async fn half_opens_after_reset_timeout() {
        let (b, clock) = breaker(2, Duration::from_millis(20));
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        clock.advance(30);
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.allow());
    }

    #[tokio::test]
    async fn half_open_success_closes_after_success_threshold() {
        let clock = ManualClock::new();
        let b = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(10),
            window: Duration::from_secs(60),
        })
        .with_clock(clock.clone());

        let _ = fail(&b).await;
        clock.advance(15);
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let _ = succeed(&b).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);
        let _ = succeed(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let (b, clock) = breaker(1, Duration::from_millis(10));
        let _ = fail(&b).await;
        clock.advance(15);
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allow());
    }

    #[tokio::test]
    async fn failures_age_out_of_window() {
        let clock = ManualClock::new();
        let b = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(10),
            window: Duration::from_millis(100),
        })
        .with_clock(clock.clone());

        let _ = fail(&b).await;
        let _ = fail(&b).await;
        // Old failures fall outside the window before the third lands.
        clock.advance(150);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);

        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn only_one_probe_runs_in_half_open() {
        let (b, clock) = breaker(1, Duration::from_millis(10));
        let _ = fail(&b).await;
        clock.advance(15);
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let probe = {
            let b = b.clone();
            tokio::spawn(async move {
                let mut started = Some(started_tx);
                let release = std::sync::Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
                b.execute(move || {
                    let _ = started.take().map(|tx| tx.send(()));
                    let release = release.clone();
                    async move {
                        if let Some(rx) = release.lock().await.take() {
                            let _ = rx.await;
                        }
                        Ok::<_, Error>(1)
                    }
                })
                .await
            })
        };

        started_rx.await.unwrap();
        // A concurrent call while the probe is in flight is refused.
        let err = succeed(&b).await.unwrap_err();
        assert!(err.is_circuit_open());

        let _ = release_tx.send(());
        let _ = probe.await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn cancelled_calls_do_not_count_as_failures() {
        let (b, _) = breaker(1, Duration::from_secs(10));
        let _ = b
            .execute(|| async { Err::<(), _>(Error::cancelled()) })
            .await;
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let (b, _) = breaker(1, Duration::from_secs(10));
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.allow());
    }
}
