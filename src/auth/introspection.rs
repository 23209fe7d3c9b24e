//! RFC 7662 token introspection and RFC 7009 revocation.

use crate::auth::flows::OAuthClient;
use crate::error::Error;
use crate::secret::Secret;
use serde::Deserialize;
use std::collections::HashMap;

/// Claims view returned by the introspection endpoint.
///
/// Only `active` is guaranteed; everything else is present at the server's
/// discretion. Unrecognized claims land in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl OAuthClient {
    /// Query the introspection endpoint for a token's active/claims view.
    #[tracing::instrument(skip_all)]
    pub async fn introspect(
        &self,
        token: &Secret,
        token_type_hint: Option<&str>,
    ) -> Result<Introspection, Error> {
        let endpoint = self
            .config
            .introspection_endpoint
            .clone()
            .ok_or_else(|| Error::configuration("no introspection endpoint configured"))?;

        let mut params = vec![("token", token.expose().to_string())];
        if let Some(hint) = token_type_hint {
            params.push(("token_type_hint", hint.to_string()));
        }

        let response = self.form_request(&endpoint, &mut params).await?;
        let status = response.status().as_u16();
        if status != 200 {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::classify(status, &body, &headers));
        }
        response.json::<Introspection>().await.map_err(Error::from)
    }

    /// Revoke a token.
    ///
    /// Any 200 is success, whether or not the server knew the token.
    #[tracing::instrument(skip_all)]
    pub async fn revoke(
        &self,
        token: &Secret,
        token_type_hint: Option<&str>,
    ) -> Result<(), Error> {
        let endpoint = self
            .config
            .revocation_endpoint
            .clone()
            .ok_or_else(|| Error::configuration("no revocation endpoint configured"))?;

        let mut params = vec![("token", token.expose().to_string())];
        if let Some(hint) = token_type_hint {
            params.push(("token_type_hint", hint.to_string()));
        }

        let response = self.form_request(&endpoint, &mut params).await?;
        let status = response.status().as_u16();
        if status == 200 {
            return Ok(());
        }
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(Error::classify(status, &body, &headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn introspection_parses_minimal_payload() {
        let parsed: Introspection = serde_json::from_value(serde_json::json!({
            "active": false
        }))
        .unwrap();
        assert!(!parsed.active);
        assert!(parsed.scope.is_none());
    }

    #[test]
    fn introspection_collects_extra_claims() {
        let parsed: Introspection = serde_json::from_value(serde_json::json!({
            "active": true,
            "scope": "read",
            "sub": "user-1",
            "custom_claim": 42
        }))
        .unwrap();
        assert!(parsed.active);
        assert_eq!(parsed.sub.as_deref(), Some("user-1"));
        assert_eq!(parsed.extra["custom_claim"], 42);
    }
}
