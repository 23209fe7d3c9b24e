//! OAuth2 grant flows: authorization-code (with optional PKCE),
//! client-credentials, and refresh-token.
//!
//! The client builds authorization URLs (generating CSRF state and PKCE
//! material into the state store), consumes redirect callbacks one-shot,
//! and exchanges grants at the token endpoint with the configured client
//! authentication.

use crate::auth::pkce::{self, PkceMethod};
use crate::auth::state::{MemoryStateStore, StateEntry, StateStore};
use crate::auth::types::{
    ClientAuthMethod, OAuthConfig, TokenBundle, TokenErrorResponse, TokenResponse,
};
use crate::error::Error;
use crate::secret::Secret;
use crate::transport::DEFAULT_USER_AGENT;
use crate::{Sleeper, TokioSleeper};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Options for building an authorization URL.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeRequest {
    /// Override the configured default scopes.
    pub scopes: Option<Vec<String>>,
    pub prompt: Option<String>,
    pub login_hint: Option<String>,
    /// Additional provider-specific query parameters.
    pub extra_params: Vec<(String, String)>,
    /// Attach a PKCE challenge derived with this method.
    pub pkce: Option<PkceMethod>,
}

/// A built authorization URL plus the state backing it.
#[derive(Debug, Clone)]
pub struct AuthorizationUrl {
    pub url: Url,
    pub state: String,
    /// Present when PKCE was requested.
    pub code_challenge: Option<String>,
}

/// Query parameters returned on the redirect URI.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse from a redirect URI query string.
    pub fn from_query(query: &str) -> Self {
        let map: HashMap<String, String> =
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
        Self {
            code: map.get("code").cloned(),
            state: map.get("state").cloned(),
            error: map.get("error").cloned(),
            error_description: map.get("error_description").cloned(),
        }
    }
}

/// A validated callback, ready for code exchange.
#[derive(Debug, Clone)]
pub struct AuthorizedCallback {
    pub code: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub pkce_verifier: Option<String>,
}

/// Options for the client-credentials grant.
#[derive(Debug, Clone, Default)]
pub struct ClientCredentialsRequest {
    pub scopes: Option<Vec<String>>,
    pub resource: Option<String>,
    pub audience: Option<String>,
}

/// Internal result of a token-endpoint POST, keeping the raw OAuth error
/// code visible for flows (device polling) that branch on it.
pub(crate) enum TokenEndpointError {
    OAuth { code: String, description: Option<String>, status: u16 },
    Transport(Error),
}

impl TokenEndpointError {
    pub(crate) fn into_error(self) -> Error {
        match self {
            Self::OAuth { code, description, status } => {
                Error::from_token_error(&code, description.as_deref(), status)
            }
            Self::Transport(e) => e,
        }
    }
}

/// OAuth2 client for one authorization server.
pub struct OAuthClient {
    pub(crate) config: OAuthConfig,
    pub(crate) http: reqwest::Client,
    pub(crate) state_store: Arc<dyn StateStore>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.config.client_id)
            .field("token_endpoint", &self.config.token_endpoint.as_str())
            .finish()
    }
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(config, http))
    }

    /// Build with a shared `reqwest` client.
    pub fn with_http_client(config: OAuthConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            state_store: Arc::new(MemoryStateStore::new()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = store;
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorization URL, generating state (and PKCE when
    /// requested) into the state store.
    #[tracing::instrument(skip_all, fields(client_id = %self.config.client_id))]
    pub async fn authorization_url(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizationUrl, Error> {
        let scopes = request
            .scopes
            .clone()
            .unwrap_or_else(|| self.config.scopes.clone());

        let pkce_pair = request.pkce.map(pkce::generate);
        let state = self
            .state_store
            .generate(StateEntry {
                redirect_uri: self.config.redirect_uri.clone(),
                scopes: scopes.clone(),
                pkce_verifier: pkce_pair.as_ref().map(|p| p.verifier.clone()),
            })
            .await;

        let mut url = self.config.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            let _ = query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("state", &state);
            if !scopes.is_empty() {
                let _ = query.append_pair("scope", &scopes.join(" "));
            }
            if let Some(prompt) = &request.prompt {
                let _ = query.append_pair("prompt", prompt);
            }
            if let Some(hint) = &request.login_hint {
                let _ = query.append_pair("login_hint", hint);
            }
            for (key, value) in &request.extra_params {
                let _ = query.append_pair(key, value);
            }
            if let Some(pair) = &pkce_pair {
                let _ = query
                    .append_pair("code_challenge", &pair.challenge)
                    .append_pair("code_challenge_method", pair.method.as_str());
            }
        }

        tracing::debug!(scopes = scopes.len(), pkce = pkce_pair.is_some(), "authorization url built");
        Ok(AuthorizationUrl {
            url,
            state,
            code_challenge: pkce_pair.map(|p| p.challenge),
        })
    }

    /// Validate a redirect callback and consume its state entry.
    ///
    /// State consumption is one-shot; a failed callback requires a new
    /// authorization handshake.
    #[tracing::instrument(skip_all)]
    pub async fn handle_callback(
        &self,
        params: &CallbackParams,
    ) -> Result<AuthorizedCallback, Error> {
        if let Some(error) = &params.error {
            let message = params
                .error_description
                .clone()
                .unwrap_or_else(|| format!("authorization server returned {error}"));
            let err = Error::authentication(message);
            return Err(if error == "access_denied" {
                err.with_code("authorization_denied")
            } else {
                err
            });
        }

        let (Some(code), Some(state)) = (&params.code, &params.state) else {
            return Err(Error::validation("callback missing code or state")
                .with_code("state_mismatch"));
        };

        let Some(entry) = self.state_store.consume(state).await else {
            tracing::warn!("callback carried unknown or expired state");
            return Err(Error::validation("unknown or expired authorization state")
                .with_code("state_mismatch"));
        };

        Ok(AuthorizedCallback {
            code: code.clone(),
            redirect_uri: entry.redirect_uri,
            scopes: entry.scopes,
            pkce_verifier: entry.pkce_verifier,
        })
    }

    /// Exchange an authorization code for tokens.
    #[tracing::instrument(skip_all)]
    pub async fn exchange_code(&self, callback: &AuthorizedCallback) -> Result<TokenBundle, Error> {
        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", callback.code.clone()),
            ("redirect_uri", callback.redirect_uri.clone()),
        ];
        if let Some(verifier) = &callback.pkce_verifier {
            params.push(("code_verifier", verifier.clone()));
        }

        let response = self
            .token_request(&self.config.token_endpoint, params)
            .await
            .map_err(TokenEndpointError::into_error)?;
        Ok(response.into_bundle(None))
    }

    /// Obtain tokens with the client-credentials grant.
    #[tracing::instrument(skip_all)]
    pub async fn client_credentials(
        &self,
        request: &ClientCredentialsRequest,
    ) -> Result<TokenBundle, Error> {
        let mut params = vec![("grant_type", "client_credentials".to_string())];
        let scopes = request
            .scopes
            .clone()
            .unwrap_or_else(|| self.config.scopes.clone());
        if !scopes.is_empty() {
            params.push(("scope", scopes.join(" ")));
        }
        if let Some(resource) = &request.resource {
            params.push(("resource", resource.clone()));
        }
        if let Some(audience) = &request.audience {
            params.push(("audience", audience.clone()));
        }

        let response = self
            .token_request(&self.config.token_endpoint, params)
            .await
            .map_err(TokenEndpointError::into_error)?;
        Ok(response.into_bundle(None))
    }

    /// Exchange a refresh token for a new bundle.
    ///
    /// The supplied refresh token is carried into the result when the
    /// server omits a replacement.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &Secret) -> Result<TokenBundle, Error> {
        let params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.expose().to_string()),
        ];
        let response = self
            .token_request(&self.config.token_endpoint, params)
            .await
            .map_err(TokenEndpointError::into_error)?;
        Ok(response.into_bundle(Some(refresh_token)))
    }

    /// POST a form to a token-style endpoint with client authentication.
    pub(crate) async fn token_request(
        &self,
        endpoint: &Url,
        mut params: Vec<(&str, String)>,
    ) -> Result<TokenResponse, TokenEndpointError> {
        let response = self
            .form_request(endpoint, &mut params)
            .await
            .map_err(TokenEndpointError::Transport)?;

        let status = response.status().as_u16();
        if status == 200 {
            return response
                .json::<TokenResponse>()
                .await
                .map_err(|e| TokenEndpointError::Transport(Error::from(e)));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(oauth) => Err(TokenEndpointError::OAuth {
                code: oauth.error,
                description: oauth.error_description,
                status,
            }),
            Err(_) => Err(TokenEndpointError::Transport(Error::classify(
                status,
                &body,
                &reqwest::header::HeaderMap::new(),
            ))),
        }
    }

    /// POST a form without expecting a token payload (revocation).
    pub(crate) async fn form_request(
        &self,
        endpoint: &Url,
        params: &mut Vec<(&str, String)>,
    ) -> Result<reqwest::Response, Error> {
        params.push(("client_id", self.config.client_id.clone()));

        let mut request = self.http.post(endpoint.clone());
        match self.config.client_auth {
            ClientAuthMethod::Body => {
                if let Some(secret) = &self.config.client_secret {
                    params.push(("client_secret", secret.expose().to_string()));
                }
            }
            ClientAuthMethod::Basic => {
                let password = self.config.client_secret.as_ref().map(Secret::expose);
                request = request.basic_auth(&self.config.client_id, password);
            }
            ClientAuthMethod::None => {}
        }

        request.form(params).send().await.map_err(Error::from)
    }
}
