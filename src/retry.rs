//! Retry executor.
//!
//! Wraps an operation in an attempt loop with backoff, jitter, a
//! retryability predicate, server-suggested `retry-after` honoring, and
//! pre-retry hooks. All waits run through [`Sleeper`] and honor the
//! policy's cancellation token.

use crate::error::{Error, ErrorKind};
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Declarative retry settings, convertible into a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    /// HTTP statuses retried in addition to transient error kinds.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_enabled: true,
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Build a policy from this configuration.
    pub fn policy(&self) -> Result<RetryPolicy, BuildError> {
        let statuses = self.retryable_statuses.clone();
        let jitter = if self.jitter_enabled {
            Jitter::proportional()
        } else {
            Jitter::None
        };
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)?
            .backoff(
                Backoff::exponential(self.initial_delay)
                    .with_multiplier(self.multiplier)
                    .with_max(self.max_delay),
            )
            .with_jitter(jitter)
            .should_retry(move |e: &Error| {
                e.is_retryable() || e.status().is_some_and(|s| statuses.contains(&s))
            })
            .build()
    }
}

/// Snapshot handed to pre-retry hooks before each wait.
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// The attempt that just failed (1-indexed).
    pub attempt: usize,
    pub max_attempts: usize,
    /// Delay before the next attempt.
    pub delay: Duration,
    pub error_kind: ErrorKind,
    pub status: Option<u16>,
}

type RetryHook = Arc<dyn Fn(&RetryEvent) + Send + Sync>;
type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: RetryPredicate,
    sleeper: Arc<dyn Sleeper>,
    hooks: Vec<RetryHook>,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `operation`, retrying per policy.
    ///
    /// The delay before each retry is the error's `retry_after` when the
    /// server supplied one, else the jittered backoff for that attempt.
    /// Cancellation exits without further attempts.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, Error>
    where
        T: Send,
        Fut: Future<Output = Result<T, Error>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        for attempt in 1..=self.max_attempts {
            if self.cancellation.is_cancelled() {
                return Err(Error::cancelled());
            }

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !(self.should_retry)(&error) || attempt == self.max_attempts {
                return Err(error);
            }

            let delay = match error.retry_after() {
                Some(server_delay) => server_delay,
                None => self.jitter.apply(self.backoff.delay(attempt)),
            };

            let event = RetryEvent {
                attempt,
                max_attempts: self.max_attempts,
                delay,
                error_kind: error.kind(),
                status: error.status(),
            };
            for hook in &self.hooks {
                hook(&event);
            }

            tracing::debug!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                kind = %error.kind(),
                "retrying after failure"
            );

            tokio::select! {
                () = self.cancellation.cancelled() => return Err(Error::cancelled()),
                () = self.sleeper.sleep(delay) => {}
            }
        }

        unreachable!("retry loop returns from within")
    }
}

pub struct RetryPolicyBuilder {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: RetryPredicate,
    sleeper: Arc<dyn Sleeper>,
    hooks: Vec<RetryHook>,
    cancellation: CancellationToken,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            jitter: Jitter::default(),
            should_retry: Arc::new(Error::is_retryable),
            sleeper: Arc::new(TokioSleeper),
            hooks: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Result<Self, BuildError> {
        if attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Register a hook invoked before each retry wait, in registration order.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RetryEvent) + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
            hooks: self.hooks,
            cancellation: self.cancellation,
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
