//! Storage-backed token cache with transparent single-flight refresh.
//!
//! `get` returns the cached access token, refreshing first when the token
//! is expiring soon and a refresh token exists. Refreshes are single-flight
//! per key: concurrent callers serialize on a per-key lock, and all but the
//! first find a fresh token on re-read instead of issuing their own POST.

use crate::auth::storage::{StoredToken, TokenStorage};
use crate::auth::types::{TokenBundle, DEFAULT_REFRESH_THRESHOLD};
use crate::error::Error;
use crate::secret::Secret;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Performs the actual refresh-token exchange.
///
/// [`crate::auth::OAuthClient`] implements this; tests substitute fakes.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_token(&self, key: &str, refresh_token: &Secret)
        -> Result<TokenBundle, Error>;
}

#[async_trait]
impl TokenRefresher for crate::auth::OAuthClient {
    async fn refresh_token(
        &self,
        _key: &str,
        refresh_token: &Secret,
    ) -> Result<TokenBundle, Error> {
        self.refresh(refresh_token).await
    }
}

pub struct TokenManager {
    storage: Arc<dyn TokenStorage>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_threshold: Duration,
    locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("refresh_threshold", &self.refresh_threshold)
            .finish()
    }
}

impl TokenManager {
    pub fn new(storage: Arc<dyn TokenStorage>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            storage,
            refresher,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Current access token for `key`, refreshing transparently when it is
    /// expiring soon and a refresh token is stored.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn get(&self, key: &str) -> Result<Secret, Error> {
        let bundle = self
            .get_raw(key)
            .await?
            .ok_or_else(|| Error::authentication(format!("no stored token for key {key:?}")))?;

        if !bundle.expiring_soon(self.refresh_threshold) {
            return Ok(bundle.access_token);
        }

        if bundle.refresh_token.is_none() {
            if !bundle.expired() {
                // Still valid, nothing we can do to extend it.
                return Ok(bundle.access_token);
            }
            return Err(Error::authentication(format!(
                "token for key {key:?} expired and no refresh token is stored"
            ))
            .with_code("token_expired"));
        }

        let refreshed = self.refresh_locked(key, false).await?;
        Ok(refreshed.access_token)
    }

    /// The stored bundle, without triggering a refresh.
    pub async fn get_raw(&self, key: &str) -> Result<Option<TokenBundle>, Error> {
        Ok(self.storage.get(key).await?.map(StoredToken::into_bundle))
    }

    pub async fn store(&self, key: &str, bundle: &TokenBundle) -> Result<(), Error> {
        self.storage.put(key, &StoredToken::from_bundle(bundle)).await
    }

    pub async fn clear(&self, key: &str) -> Result<(), Error> {
        self.storage.delete(key).await
    }

    /// Refresh now regardless of expiry. Requires a stored refresh token.
    pub async fn force_refresh(&self, key: &str) -> Result<TokenBundle, Error> {
        self.refresh_locked(key, true).await
    }

    /// Single-flight refresh for `key`.
    ///
    /// The per-key lock serializes refreshes; once inside, the bundle is
    /// re-read so callers queued behind a completed refresh return the
    /// fresh token without another exchange.
    async fn refresh_locked(&self, key: &str, force: bool) -> Result<TokenBundle, Error> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let bundle = self
            .get_raw(key)
            .await?
            .ok_or_else(|| Error::authentication(format!("no stored token for key {key:?}")))?;

        if !force && !bundle.expiring_soon(self.refresh_threshold) {
            return Ok(bundle);
        }

        let Some(refresh_token) = bundle.refresh_token.clone() else {
            return Err(Error::authentication(format!(
                "no refresh token stored for key {key:?}"
            ))
            .with_code("token_expired"));
        };

        match self.refresher.refresh_token(key, &refresh_token).await {
            Ok(mut refreshed) => {
                if refreshed.refresh_token.is_none() {
                    refreshed.refresh_token = Some(refresh_token);
                }
                self.store(key, &refreshed).await?;
                tracing::info!(key, "token refreshed");
                Ok(refreshed)
            }
            Err(e) => {
                // Grace fallback: keep serving the old token while it is
                // still inside its real lifetime.
                if !bundle.expired() {
                    tracing::warn!(key, error = %e, "refresh failed, serving unexpired token");
                    return Ok(bundle);
                }
                Err(Error::authentication(format!(
                    "token refresh failed for key {key:?}"
                ))
                .with_code("token_expired")
                .with_source(e))
            }
        }
    }

    async fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
