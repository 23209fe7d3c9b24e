#![forbid(unsafe_code)]

//! # Keel
//!
//! Shared client substrate for service SDKs: the resilience, transport,
//! credential, and webhook plumbing every API client otherwise reimplements.
//!
//! ## What's inside
//!
//! - **Resilience**: retry with backoff/jitter and retry-after honoring,
//!   a rolling-window circuit breaker, a token-bucket rate limiter with
//!   optional FIFO queueing, and [`ResilienceStack`] composing the three
//!   around a unit of work.
//! - **Transport**: unary JSON and SSE streaming over `reqwest`, with
//!   timeout, cancellation, and a shared error taxonomy.
//! - **OAuth2**: authorization-code (+PKCE), client-credentials, refresh
//!   with single-flight semantics, the device grant, introspection and
//!   revocation, plus token persistence behind [`auth::TokenManager`].
//! - **Webhooks**: constant-time token validation and typed dispatch.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use keel::{Error, ResilienceStack};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let stack = keel::presets::external_api();
//!     let payload = stack
//!         .execute(|| async {
//!             // issue a request through your transport here
//!             Ok::<_, Error>("response")
//!         })
//!         .await?;
//!     println!("{payload}");
//!     Ok(())
//! }
//! ```

pub mod auth;
mod backoff;
mod circuit_breaker;
mod circuit_breaker_registry;
mod clock;
pub mod config;
pub mod credentials;
mod error;
mod jitter;
pub mod presets;
mod rate_limit;
mod retry;
mod secret;
mod sleeper;
mod stack;
pub mod transport;
pub mod webhook;

// Re-exports
pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use circuit_breaker_registry::CircuitBreakerRegistry;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{Error, ErrorKind};
pub use jitter::Jitter;
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use retry::{BuildError, RetryConfig, RetryEvent, RetryPolicy, RetryPolicyBuilder};
pub use secret::Secret;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{ResilienceStack, ResilienceStackBuilder};
pub use transport::{HttpTransport, SseEvent, SseEventStream, TransportConfig, TransportResponse};

pub mod prelude;
