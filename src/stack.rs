//! Composition of resilience policies around a unit of work.
//!
//! Order per call: rate-limit acquire, then a circuit-breaker admission
//! check, then the retry loop around the breaker-wrapped operation. The
//! limiter sits outermost so retries never spin against an empty bucket;
//! the breaker sits inside the retry loop so every attempt updates breaker
//! state, and a tripped circuit short-circuits the loop because
//! `circuit_open` is not retryable.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{Error, ErrorKind};
use crate::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::retry::{BuildError, RetryConfig, RetryPolicy};
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Composed limiter → breaker → retry pipeline.
#[derive(Debug, Clone)]
pub struct ResilienceStack {
    limiter: Option<RateLimiter>,
    breaker: Option<CircuitBreaker>,
    retry: RetryPolicy,
}

impl ResilienceStack {
    pub fn builder() -> ResilienceStackBuilder {
        ResilienceStackBuilder::new()
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    /// Run `operation` through the configured policies.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, Error>
    where
        T: Send,
        Fut: Future<Output = Result<T, Error>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await?;
        }

        if let Some(breaker) = &self.breaker {
            if !breaker.allow() {
                return Err(Error::new(
                    ErrorKind::CircuitOpen,
                    "circuit breaker open, refusing call",
                ));
            }
        }

        let op_cell = Arc::new(Mutex::new(operation));
        match &self.breaker {
            Some(breaker) => {
                self.retry
                    .execute(|| {
                        let op = op_cell.clone();
                        let breaker = breaker.clone();
                        async move {
                            breaker
                                .execute(move || {
                                    let mut op = op.lock().unwrap();
                                    op()
                                })
                                .await
                        }
                    })
                    .await
            }
            None => {
                self.retry
                    .execute(|| {
                        let op = op_cell.clone();
                        async move {
                            let fut = {
                                let mut op = op.lock().unwrap();
                                op()
                            };
                            fut.await
                        }
                    })
                    .await
            }
        }
    }
}

pub struct ResilienceStackBuilder {
    limiter: Option<RateLimiter>,
    breaker: Option<CircuitBreaker>,
    retry: Option<RetryPolicy>,
}

impl ResilienceStackBuilder {
    pub fn new() -> Self {
        Self { limiter: None, breaker: None, retry: None }
    }

    pub fn rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.limiter = Some(RateLimiter::new(config));
        self
    }

    /// Install an already-built limiter (shared across stacks).
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(CircuitBreaker::new(config));
        self
    }

    /// Install an already-built breaker (shared across stacks).
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn retry_config(mut self, config: &RetryConfig) -> Result<Self, BuildError> {
        self.retry = Some(config.policy()?);
        Ok(self)
    }

    pub fn build(self) -> Result<ResilienceStack, BuildError> {
        let retry = match self.retry {
            Some(policy) => policy,
            None => RetryConfig::default().policy()?,
        };
        Ok(ResilienceStack {
            limiter: self.limiter,
            breaker: self.breaker,
            retry,
        })
    }
}

impl Default for ResilienceStackBuilder {
    fn default() -> Self {
        Self::new()
    }
}
