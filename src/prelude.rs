//! Convenience re-exports for the common path.
//!
//! ```rust
//! use keel::prelude::*;
//! ```

pub use crate::auth::{
    AuthorizeRequest, CallbackParams, ClientAuthMethod, OAuthClient, OAuthConfig, PkceMethod,
    TokenBundle, TokenManager,
};
pub use crate::credentials::CredentialProvider;
pub use crate::error::{Error, ErrorKind};
pub use crate::stack::{ResilienceStack, ResilienceStackBuilder};
pub use crate::transport::{HttpTransport, SseEvent, TransportConfig};
pub use crate::webhook::{WebhookHandler, WebhookRequest, WebhookValidator, WebhookValidatorConfig};
pub use crate::{
    Backoff, CircuitBreaker, CircuitBreakerConfig, CircuitState, Jitter, RateLimiter,
    RateLimiterConfig, RetryConfig, RetryPolicy, Secret,
};
