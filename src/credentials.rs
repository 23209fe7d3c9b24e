//! Pluggable credential providers.
//!
//! A provider hands out the bearer secret for `Authorization` and knows how
//! to refresh or invalidate it. Static tokens and environment variables
//! cover PAT-style auth; OAuth-backed providers delegate to the
//! [`TokenManager`], and the client-credentials provider caches its grant
//! until it approaches expiry.

use crate::auth::flows::{ClientCredentialsRequest, OAuthClient};
use crate::auth::token_manager::TokenManager;
use crate::auth::types::{TokenBundle, DEFAULT_REFRESH_THRESHOLD};
use crate::error::Error;
use crate::secret::Secret;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Capability set shared by all credential sources.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current secret, refreshing first if the provider knows it expired.
    async fn get(&self) -> Result<Secret, Error>;

    /// Force-refresh and return the new secret. Defaults to `get`.
    async fn refresh(&self) -> Result<Secret, Error> {
        self.get().await
    }

    /// Whether the cached credential is past its (buffered) expiry.
    /// Providers without expiry report `false`.
    fn is_expired(&self) -> bool {
        false
    }

    /// Drop any cached credential so the next `get` fetches fresh.
    async fn invalidate(&self) {}

    /// Value for the `Authorization` header.
    async fn authorization_value(&self) -> Result<String, Error> {
        Ok(format!("Bearer {}", self.get().await?.expose()))
    }
}

/// Buffer applied before the real expiry when judging staleness.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(300);

/// A fixed token (personal access token, API key).
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: Secret,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<Secret>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn get(&self) -> Result<Secret, Error> {
        Ok(self.token.clone())
    }
}

/// Token read from an environment variable on every `get`.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialProvider for EnvTokenProvider {
    async fn get(&self) -> Result<Secret, Error> {
        match std::env::var(&self.var) {
            Ok(value) if !value.is_empty() => Ok(Secret::new(value)),
            _ => Err(Error::configuration(format!(
                "environment variable {} is not set",
                self.var
            ))),
        }
    }
}

/// OAuth tokens managed by a [`TokenManager`] under a fixed key.
pub struct OAuthTokenProvider {
    manager: Arc<TokenManager>,
    key: String,
}

impl OAuthTokenProvider {
    pub fn new(manager: Arc<TokenManager>, key: impl Into<String>) -> Self {
        Self { manager, key: key.into() }
    }
}

#[async_trait]
impl CredentialProvider for OAuthTokenProvider {
    async fn get(&self) -> Result<Secret, Error> {
        self.manager.get(&self.key).await
    }

    async fn refresh(&self) -> Result<Secret, Error> {
        Ok(self.manager.force_refresh(&self.key).await?.access_token)
    }

    async fn invalidate(&self) {
        if let Err(e) = self.manager.clear(&self.key).await {
            tracing::warn!(key = %self.key, error = %e, "failed to clear stored token");
        }
    }
}

/// Client-credentials grant with a cached bundle.
///
/// The grant is re-run only when the cached token is inside the refresh
/// threshold of its expiry; concurrent callers share one fetch.
pub struct ClientCredentialsProvider {
    client: Arc<OAuthClient>,
    request: ClientCredentialsRequest,
    refresh_threshold: Duration,
    cache: tokio::sync::Mutex<Option<TokenBundle>>,
}

impl ClientCredentialsProvider {
    pub fn new(client: Arc<OAuthClient>, request: ClientCredentialsRequest) -> Self {
        Self {
            client,
            request,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            cache: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialsProvider {
    async fn get(&self) -> Result<Secret, Error> {
        let mut cache = self.cache.lock().await;
        if let Some(bundle) = cache.as_ref() {
            if !bundle.expiring_soon(self.refresh_threshold) {
                return Ok(bundle.access_token.clone());
            }
        }

        let bundle = self.client.client_credentials(&self.request).await?;
        let token = bundle.access_token.clone();
        *cache = Some(bundle);
        Ok(token)
    }

    async fn refresh(&self) -> Result<Secret, Error> {
        let mut cache = self.cache.lock().await;
        let bundle = self.client.client_credentials(&self.request).await?;
        let token = bundle.access_token.clone();
        *cache = Some(bundle);
        Ok(token)
    }

    fn is_expired(&self) -> bool {
        match self.cache.try_lock() {
            Ok(cache) => cache
                .as_ref()
                .map_or(true, |bundle| bundle.expiring_soon(EXPIRY_BUFFER)),
            // A held lock means a fetch is in flight.
            Err(_) => false,
        }
    }

    async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }
}

/// Tagged configuration selecting a provider implementation.
#[derive(Debug, Clone)]
pub enum CredentialConfig {
    /// Fixed token value.
    Token { token: Secret },
    /// Read from an environment variable.
    Env { var: String },
    /// OAuth tokens under `key` in a token manager.
    OAuth { key: String },
}

impl CredentialConfig {
    /// Instantiate the provider this configuration describes.
    ///
    /// The `OAuth` variant requires a token manager.
    pub fn into_provider(
        self,
        manager: Option<Arc<TokenManager>>,
    ) -> Result<Arc<dyn CredentialProvider>, Error> {
        match self {
            Self::Token { token } => Ok(Arc::new(StaticTokenProvider::new(token))),
            Self::Env { var } => Ok(Arc::new(EnvTokenProvider::new(var))),
            Self::OAuth { key } => {
                let manager = manager.ok_or_else(|| {
                    Error::configuration("oauth credential config requires a token manager")
                })?;
                Ok(Arc::new(OAuthTokenProvider::new(manager, key)))
            }
        }
    }
}
