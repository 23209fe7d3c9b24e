//! RFC 8628 device authorization grant.
//!
//! The client requests a device code, surfaces the user code and
//! verification URI to the caller, then polls the token endpoint at the
//! server-directed interval until the user approves, denies, or the code
//! expires.

use crate::auth::flows::{OAuthClient, TokenEndpointError};
use crate::auth::types::{DeviceAuthorization, TokenBundle};
use crate::error::{Error, ErrorKind};
use std::time::Duration;

/// Tuning for the polling loop.
#[derive(Debug, Clone)]
pub struct DeviceFlowConfig {
    /// Stop polling after this long even if the code has not expired.
    pub max_wait: Option<Duration>,
    /// Consecutive transport failures tolerated before surfacing.
    pub max_network_failures: u32,
}

impl Default for DeviceFlowConfig {
    fn default() -> Self {
        Self { max_wait: None, max_network_failures: 5 }
    }
}

impl OAuthClient {
    /// Request a device and user code.
    #[tracing::instrument(skip_all)]
    pub async fn device_authorization(
        &self,
        scopes: Option<Vec<String>>,
    ) -> Result<DeviceAuthorization, Error> {
        let endpoint = self
            .config
            .device_authorization_endpoint
            .clone()
            .ok_or_else(|| Error::configuration("no device authorization endpoint configured"))?;

        let mut params = Vec::new();
        let scopes = scopes.unwrap_or_else(|| self.config.scopes.clone());
        if !scopes.is_empty() {
            params.push(("scope", scopes.join(" ")));
        }

        let response = self.form_request(&endpoint, &mut params).await?;
        let status = response.status().as_u16();
        if status != 200 {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::classify(status, &body, &headers));
        }
        response.json::<DeviceAuthorization>().await.map_err(Error::from)
    }

    /// Poll the token endpoint until the device grant resolves.
    ///
    /// Handles `authorization_pending` (keep polling), `slow_down` (add
    /// 5 s to the interval), `expired_token`, and `access_denied`. Gives
    /// up when the device code's lifetime or `max_wait` elapses, and
    /// tolerates up to `max_network_failures` consecutive transport
    /// failures before surfacing one.
    #[tracing::instrument(skip_all, fields(user_code = %authorization.user_code))]
    pub async fn poll_device_token(
        &self,
        authorization: &DeviceAuthorization,
        config: &DeviceFlowConfig,
    ) -> Result<TokenBundle, Error> {
        let mut interval = Duration::from_secs(authorization.interval.max(1));
        let code_lifetime = Duration::from_secs(authorization.expires_in);
        let deadline = match config.max_wait {
            Some(max_wait) => code_lifetime.min(max_wait),
            None => code_lifetime,
        };

        let mut waited = Duration::ZERO;
        let mut network_failures: u32 = 0;

        loop {
            if waited >= deadline {
                return Err(expired());
            }
            self.sleeper.sleep(interval).await;
            waited += interval;

            let params = vec![
                (
                    "grant_type",
                    "urn:ietf:params:oauth:grant-type:device_code".to_string(),
                ),
                ("device_code", authorization.device_code.clone()),
            ];

            match self
                .token_request(&self.config.token_endpoint, params)
                .await
            {
                Ok(response) => return Ok(response.into_bundle(None)),
                Err(TokenEndpointError::OAuth { code, description, status }) => {
                    network_failures = 0;
                    match code.as_str() {
                        "authorization_pending" => {
                            tracing::debug!(waited_secs = waited.as_secs(), "authorization pending");
                        }
                        "slow_down" => {
                            interval += Duration::from_secs(5);
                            tracing::debug!(
                                interval_secs = interval.as_secs(),
                                "server asked to slow down"
                            );
                        }
                        "expired_token" => return Err(expired()),
                        "access_denied" => {
                            return Err(Error::authentication(
                                description.unwrap_or_else(|| "user denied the request".into()),
                            )
                            .with_code("authorization_denied"));
                        }
                        other => {
                            return Err(Error::from_token_error(
                                other,
                                description.as_deref(),
                                status,
                            ));
                        }
                    }
                }
                Err(TokenEndpointError::Transport(e))
                    if matches!(e.kind(), ErrorKind::Network | ErrorKind::Timeout) =>
                {
                    network_failures += 1;
                    tracing::warn!(
                        consecutive = network_failures,
                        "device poll transport failure"
                    );
                    if network_failures > config.max_network_failures {
                        return Err(e);
                    }
                }
                Err(other) => return Err(other.into_error()),
            }
        }
    }
}

fn expired() -> Error {
    Error::authentication("device code expired before authorization completed")
        .with_code("device_code_expired")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_tolerates_five_failures() {
        let config = DeviceFlowConfig::default();
        assert_eq!(config.max_network_failures, 5);
        assert!(config.max_wait.is_none());
    }

    #[test]
    fn device_authorization_deserializes_with_default_interval() {
        let auth: DeviceAuthorization = serde_json::from_value(serde_json::json!({
            "device_code": "dc",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://example.com/device",
            "expires_in": 900
        }))
        .unwrap();
        assert_eq!(auth.interval, 5);
        assert!(auth.verification_uri_complete.is_none());
    }
}
