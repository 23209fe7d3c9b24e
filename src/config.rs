//! Environment-backed client configuration.
//!
//! SDK clients load their base settings from prefixed environment
//! variables (`<PREFIX>_BASE_URL`, `<PREFIX>_API_KEY`, ...). Missing
//! required values fail with a `configuration` error naming the variable.

use crate::error::Error;
use crate::secret::Secret;
use std::time::Duration;
use url::Url;

/// Base settings shared by SDK clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub api_key: Option<Secret>,
    pub timeout: Duration,
    pub max_retries: usize,
}

impl ClientConfig {
    /// Load from `<PREFIX>_BASE_URL` (required), `<PREFIX>_API_KEY`,
    /// `<PREFIX>_TIMEOUT_SECS`, and `<PREFIX>_MAX_RETRIES`.
    pub fn from_env(prefix: &str) -> Result<Self, Error> {
        let base_url_raw = required_var(&format!("{prefix}_BASE_URL"))?;
        let base_url = Url::parse(&base_url_raw).map_err(|e| {
            Error::configuration(format!("{prefix}_BASE_URL is not a valid url: {e}"))
        })?;

        let timeout = match optional_var(&format!("{prefix}_TIMEOUT_SECS")) {
            Some(raw) => Duration::from_secs(parse_var(&format!("{prefix}_TIMEOUT_SECS"), &raw)?),
            None => Duration::from_secs(30),
        };
        let max_retries = match optional_var(&format!("{prefix}_MAX_RETRIES")) {
            Some(raw) => parse_var(&format!("{prefix}_MAX_RETRIES"), &raw)?,
            None => 3,
        };

        Ok(Self {
            base_url,
            api_key: optional_var(&format!("{prefix}_API_KEY")).map(Secret::new),
            timeout,
            max_retries,
        })
    }
}

/// Read a required environment variable.
pub fn required_var(name: &str) -> Result<String, Error> {
    optional_var(name)
        .ok_or_else(|| Error::configuration(format!("required environment variable {name} is not set")))
}

/// Read an optional environment variable; empty counts as unset.
pub fn optional_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, Error> {
    raw.trim()
        .parse()
        .map_err(|_| Error::configuration(format!("{name} has an invalid value: {raw:?}")))
}
