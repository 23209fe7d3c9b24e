//! Token-bucket rate limiter with optional FIFO queueing.
//!
//! Tokens refill linearly: `elapsed / window * max_requests`, clamped at
//! `max_requests`. Fail-fast mode rejects immediately with the time until
//! the next token; queued mode parks waiters in FIFO order and wakes them
//! from a scheduled waker task as tokens accrue.
//!
//! `update_from_headers` reconciles the local bucket with the server's
//! advertised remaining count. It only ever clamps downward; raising the
//! local count from a header would let a stale server value overrun the
//! budget.

use crate::clock::{Clock, MonotonicClock};
use crate::error::{Error, ErrorKind};
use crate::{Sleeper, TokioSleeper};
use reqwest::header::HeaderMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Default header consulted by [`RateLimiter::update_from_headers`].
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket capacity and refill amount per `window`.
    pub max_requests: u32,
    pub window: Duration,
    /// Park callers instead of failing when the bucket is empty.
    pub queue_enabled: bool,
    pub max_queue: usize,
    /// Response header carrying the server's remaining count.
    pub remaining_header: String,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            queue_enabled: false,
            max_queue: 256,
            remaining_header: REMAINING_HEADER.to_string(),
        }
    }
}

#[derive(Debug)]
struct LimiterInner {
    tokens: f64,
    last_refill: u64,
    queue: VecDeque<oneshot::Sender<()>>,
    waker_running: bool,
}

/// Shared token bucket; clones observe the same bucket.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<LimiterInner>>,
    config: Arc<RateLimiterConfig>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_clock_and_sleeper(config, MonotonicClock::default(), TokioSleeper)
    }

    pub fn with_clock_and_sleeper<C, S>(config: RateLimiterConfig, clock: C, sleeper: S) -> Self
    where
        C: Clock + 'static,
        S: Sleeper + 'static,
    {
        let clock = Arc::new(clock);
        Self {
            inner: Arc::new(Mutex::new(LimiterInner {
                tokens: f64::from(config.max_requests),
                last_refill: clock.now_millis(),
                queue: VecDeque::new(),
                waker_running: false,
            })),
            config: Arc::new(config),
            clock,
            sleeper: Arc::new(sleeper),
        }
    }

    /// Take one token, waiting in queue when queueing is enabled.
    ///
    /// Fail-fast mode returns `rate_limit` carrying the time until the next
    /// token; queued mode fails only when the queue itself is full. Waiters
    /// wake in FIFO order.
    pub async fn acquire(&self) -> Result<(), Error> {
        let rx = {
            let mut inner = self.lock();
            self.refill(&mut inner);
            self.drain_queue(&mut inner);

            if inner.queue.is_empty() && inner.tokens >= 1.0 {
                inner.tokens -= 1.0;
                return Ok(());
            }

            if !self.config.queue_enabled {
                let wait = self.time_until_token(&inner);
                return Err(Error::new(
                    ErrorKind::RateLimit,
                    format!("rate limit exceeded, next token in {wait:?}"),
                )
                .with_retry_after(wait));
            }

            if inner.queue.len() >= self.config.max_queue {
                return Err(Error::new(
                    ErrorKind::RateLimit,
                    format!("rate limit queue full ({} waiting)", inner.queue.len()),
                ));
            }

            let (tx, rx) = oneshot::channel();
            inner.queue.push_back(tx);
            self.spawn_waker(&mut inner);
            rx
        };

        match rx.await {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::new(ErrorKind::RateLimit, "rate limiter shut down")),
        }
    }

    /// Current token count, after refill. Primarily for inspection/tests.
    pub fn tokens(&self) -> f64 {
        let mut inner = self.lock();
        self.refill(&mut inner);
        inner.tokens
    }

    /// Time until at least one token is available.
    pub fn time_until_refill(&self) -> Duration {
        let mut inner = self.lock();
        self.refill(&mut inner);
        self.time_until_token(&inner)
    }

    /// Clamp the local bucket to the server's advertised remaining count.
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        let Some(remaining) = headers
            .get(self.config.remaining_header.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
        else {
            return;
        };

        let mut inner = self.lock();
        self.refill(&mut inner);
        if remaining < inner.tokens {
            tracing::debug!(
                local = inner.tokens,
                remaining,
                "clamping rate limit tokens to server count"
            );
            inner.tokens = remaining.max(0.0);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LimiterInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refill(&self, inner: &mut LimiterInner) {
        let now = self.clock.now_millis();
        let elapsed = now.saturating_sub(inner.last_refill);
        if elapsed == 0 {
            return;
        }
        let window_ms = self.config.window.as_millis().max(1) as f64;
        let new_tokens = (elapsed as f64 / window_ms) * f64::from(self.config.max_requests);
        inner.tokens = (inner.tokens + new_tokens).min(f64::from(self.config.max_requests));
        inner.last_refill = now;
    }

    fn time_until_token(&self, inner: &LimiterInner) -> Duration {
        if inner.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let needed = 1.0 - inner.tokens;
        let per_token = self.config.window.as_secs_f64() / f64::from(self.config.max_requests);
        Duration::from_secs_f64(needed * per_token)
    }

    /// Wake queued waiters while tokens remain. A waiter that gave up
    /// (dropped receiver) returns its token to the bucket.
    fn drain_queue(&self, inner: &mut LimiterInner) {
        while inner.tokens >= 1.0 {
            let Some(tx) = inner.queue.pop_front() else {
                break;
            };
            inner.tokens -= 1.0;
            if tx.send(()).is_err() {
                inner.tokens += 1.0;
            }
        }
    }

    /// Start the waker task that services the queue as tokens accrue.
    fn spawn_waker(&self, inner: &mut LimiterInner) {
        if inner.waker_running {
            return;
        }
        inner.waker_running = true;

        let limiter = self.clone();
        let _ = tokio::spawn(async move {
            loop {
                let wait = {
                    let mut inner = limiter.lock();
                    limiter.refill(&mut inner);
                    limiter.drain_queue(&mut inner);
                    if inner.queue.is_empty() {
                        inner.waker_running = false;
                        break;
                    }
                    limiter.time_until_token(&inner).max(Duration::from_millis(1))
                };
                limiter.sleeper.sleep(wait).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use reqwest::header::HeaderValue;

    fn fail_fast(max: u32, window: Duration) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock_and_sleeper(
            RateLimiterConfig {
                max_requests: max,
                window,
                queue_enabled: false,
                ..RateLimiterConfig::default()
            },
            clock.clone(),
            TokioSleeper,
        );
        (limiter, clock)
    }

    #[tokio::test]
    async fn starts_full_and_drains() {
        let (limiter, _) = fail_fast(3, Duration::from_secs(1));
        assert_eq!(limiter.tokens(), 3.0);
        for _ in 0..3 {
            limiter.acquire().await.unwrap();
        }
        assert_eq!(limiter.tokens(), 0.0);

        let err = limiter.acquire().await.unwrap_err();
        assert!(err.is_rate_limit());
        assert!(err.retry_after().is_some());
    }

    #[tokio::test]
    async fn refills_linearly_and_clamps_at_capacity() {
        let (limiter, clock) = fail_fast(10, Duration::from_millis(100));
        for _ in 0..10 {
            limiter.acquire().await.unwrap();
        }
        assert_eq!(limiter.tokens(), 0.0);

        // Half a window restores half the bucket.
        clock.advance(50);
        assert!((limiter.tokens() - 5.0).abs() < 1e-9);

        // A long idle period never overfills.
        clock.advance(1_000);
        assert_eq!(limiter.tokens(), 10.0);
    }

    #[tokio::test]
    async fn retry_after_reflects_deficit() {
        let (limiter, _) = fail_fast(10, Duration::from_secs(10));
        for _ in 0..10 {
            limiter.acquire().await.unwrap();
        }
        // One token accrues per second.
        let wait = limiter.time_until_refill();
        assert!(wait > Duration::from_millis(900), "got {wait:?}");
        assert!(wait <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn queued_waiters_wake_in_fifo_order() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests: 1,
            window: Duration::from_millis(20),
            queue_enabled: true,
            max_queue: 16,
            ..RateLimiterConfig::default()
        });

        limiter.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await.unwrap();
                order.lock().unwrap().push(i);
            }));
            // Stagger enqueue so arrival order is deterministic.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(order.lock().unwrap().clone(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn full_queue_rejects() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests: 1,
            window: Duration::from_secs(3600),
            queue_enabled: true,
            max_queue: 1,
            ..RateLimiterConfig::default()
        });

        limiter.acquire().await.unwrap();

        let parked = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = limiter.acquire().await.unwrap_err();
        assert!(err.is_rate_limit());
        assert!(err.message().contains("queue full"));
        parked.abort();
    }

    #[tokio::test]
    async fn header_update_clamps_downward_only() {
        let (limiter, _) = fail_fast(10, Duration::from_secs(60));

        let mut headers = HeaderMap::new();
        let _ = headers.insert(REMAINING_HEADER, HeaderValue::from_static("4"));
        limiter.update_from_headers(&headers);
        assert_eq!(limiter.tokens(), 4.0);

        // A higher server count never raises the local bucket.
        let _ = headers.insert(REMAINING_HEADER, HeaderValue::from_static("100"));
        limiter.update_from_headers(&headers);
        assert_eq!(limiter.tokens(), 4.0);
    }

    #[tokio::test]
    async fn custom_remaining_header_is_consulted() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock_and_sleeper(
            RateLimiterConfig {
                max_requests: 10,
                window: Duration::from_secs(60),
                remaining_header: "ratelimit-remaining".to_string(),
                ..RateLimiterConfig::default()
            },
            clock,
            TokioSleeper,
        );

        let mut headers = HeaderMap::new();
        let _ = headers.insert("ratelimit-remaining", HeaderValue::from_static("2"));
        limiter.update_from_headers(&headers);
        assert_eq!(limiter.tokens(), 2.0);
    }

    #[tokio::test]
    async fn malformed_header_is_ignored() {
        let (limiter, _) = fail_fast(10, Duration::from_secs(60));
        let mut headers = HeaderMap::new();
        let _ = headers.insert(REMAINING_HEADER, HeaderValue::from_static("soon"));
        limiter.update_from_headers(&headers);
        assert_eq!(limiter.tokens(), 10.0);
    }
}
