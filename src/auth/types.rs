//! OAuth2 data model: token bundles, wire payloads, client configuration.

use crate::error::Error;
use crate::secret::Secret;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// Default window before expiry in which a token counts as expiring soon.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// A granted set of OAuth tokens.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    pub access_token: Secret,
    /// Scheme used in `Authorization`; servers default to `Bearer`.
    pub token_type: String,
    pub expires_at: Option<SystemTime>,
    pub refresh_token: Option<Secret>,
    pub scopes: Vec<String>,
    pub id_token: Option<Secret>,
    pub issued_at: SystemTime,
}

impl TokenBundle {
    pub fn new(access_token: impl Into<Secret>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            expires_at: None,
            refresh_token: None,
            scopes: Vec::new(),
            id_token: None,
            issued_at: SystemTime::now(),
        }
    }

    /// Whether `now + threshold` has reached the expiry instant.
    ///
    /// Tokens without an expiry never report expiring soon.
    pub fn expiring_soon(&self, threshold: Duration) -> bool {
        match self.expires_at {
            Some(expiry) => SystemTime::now() + threshold >= expiry,
            None => false,
        }
    }

    pub fn expired(&self) -> bool {
        self.expiring_soon(Duration::ZERO)
    }

    /// Value for the `Authorization` header.
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token.expose())
    }
}

/// RFC 6749 token endpoint success payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    /// Space-delimited granted scopes.
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Convert the wire payload into a bundle.
    ///
    /// When the server omits a refresh token, `prior_refresh` is carried
    /// forward so a rotation-less refresh does not lose the grant.
    pub fn into_bundle(self, prior_refresh: Option<&Secret>) -> TokenBundle {
        let now = SystemTime::now();
        TokenBundle {
            access_token: Secret::new(self.access_token),
            token_type: self.token_type,
            expires_at: self.expires_in.map(|secs| now + Duration::from_secs(secs)),
            refresh_token: self
                .refresh_token
                .map(Secret::new)
                .or_else(|| prior_refresh.cloned()),
            scopes: self
                .scope
                .map(|s| s.split_whitespace().map(ToOwned::to_owned).collect())
                .unwrap_or_default(),
            id_token: self.id_token.map(Secret::new),
            issued_at: now,
        }
    }
}

/// RFC 6749 §5.2 token endpoint error payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
    pub error_uri: Option<String>,
}

/// RFC 8628 device authorization response.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    /// Lifetime of the device code in seconds.
    pub expires_in: u64,
    /// Minimum seconds between token polls.
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
}

fn default_poll_interval() -> u64 {
    5
}

/// How the client authenticates to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientAuthMethod {
    /// `client_secret` in the form body.
    #[default]
    Body,
    /// HTTP Basic with `client_id:client_secret`.
    Basic,
    /// Public client; `client_id` only.
    None,
}

/// Endpoint and client configuration for an OAuth2 authorization server.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Option<Secret>,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub redirect_uri: String,
    /// Default scopes requested when a flow does not override them.
    pub scopes: Vec<String>,
    pub client_auth: ClientAuthMethod,
    pub introspection_endpoint: Option<Url>,
    pub revocation_endpoint: Option<Url>,
    pub device_authorization_endpoint: Option<Url>,
}

impl OAuthConfig {
    /// Minimal configuration for the code and refresh grants.
    pub fn new(
        client_id: impl Into<String>,
        authorization_endpoint: &str,
        token_endpoint: &str,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, Error> {
        Ok(Self {
            client_id: client_id.into(),
            client_secret: None,
            authorization_endpoint: parse_endpoint(authorization_endpoint)?,
            token_endpoint: parse_endpoint(token_endpoint)?,
            redirect_uri: redirect_uri.into(),
            scopes: Vec::new(),
            client_auth: ClientAuthMethod::None,
            introspection_endpoint: None,
            revocation_endpoint: None,
            device_authorization_endpoint: None,
        })
    }

    pub fn with_client_secret(mut self, secret: impl Into<Secret>, auth: ClientAuthMethod) -> Self {
        self.client_secret = Some(secret.into());
        self.client_auth = auth;
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_introspection_endpoint(mut self, endpoint: &str) -> Result<Self, Error> {
        self.introspection_endpoint = Some(parse_endpoint(endpoint)?);
        Ok(self)
    }

    pub fn with_revocation_endpoint(mut self, endpoint: &str) -> Result<Self, Error> {
        self.revocation_endpoint = Some(parse_endpoint(endpoint)?);
        Ok(self)
    }

    pub fn with_device_authorization_endpoint(mut self, endpoint: &str) -> Result<Self, Error> {
        self.device_authorization_endpoint = Some(parse_endpoint(endpoint)?);
        Ok(self)
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, Error> {
    Url::parse(raw).map_err(|e| Error::configuration(format!("invalid endpoint {raw:?}: {e}")))
}

/// Epoch milliseconds for `instant`, saturating at zero for pre-epoch times.
pub(crate) fn epoch_millis(instant: SystemTime) -> i64 {
    instant
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) fn from_epoch_millis(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}
