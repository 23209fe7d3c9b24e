//! Error taxonomy shared by every client component.
//!
//! All failures funnel into [`Error`], which pairs a closed [`ErrorKind`]
//! with a caller-safe message, the originating HTTP status when there is
//! one, and an optional server-suggested retry delay. Retryability is
//! derived from the kind and status, never set ad hoc.

use reqwest::header::HeaderMap;
use std::fmt;
use std::time::Duration;

/// Machine-readable failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid or missing client configuration.
    Configuration,
    /// Authentication or authorization failure (401/403, bad grants).
    Authentication,
    /// The request was malformed or rejected by validation (4xx).
    Validation,
    /// The resource does not exist (404).
    NotFound,
    /// The caller exceeded a rate limit (429 or local bucket).
    RateLimit,
    /// The request conflicts with current resource state (409).
    Conflict,
    /// The server failed (5xx).
    Server,
    /// DNS, connect, or other transport-level failure.
    Network,
    /// A deadline elapsed before the operation completed.
    Timeout,
    /// A streaming response failed mid-stream.
    Stream,
    /// The circuit breaker refused the call.
    CircuitOpen,
    /// The response violated the expected protocol shape.
    Protocol,
    /// Encoding or decoding payloads failed.
    Serialization,
    /// Token or state persistence failed.
    Storage,
    /// The caller cancelled the operation.
    Cancelled,
}

impl ErrorKind {
    /// Stable machine-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::RateLimit => "rate_limit",
            Self::Conflict => "conflict",
            Self::Server => "server",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Stream => "stream",
            Self::CircuitOpen => "circuit_open",
            Self::Protocol => "protocol",
            Self::Serialization => "serialization",
            Self::Storage => "storage",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified client error.
///
/// Messages are safe to surface; secret material never appears here.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    retry_after: Option<Duration>,
    code: Option<&'static str>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
            code: None,
            source: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Attach a stable sub-code such as `state_mismatch` or `token_expired`.
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn code(&self) -> Option<&'static str> {
        self.code
    }

    /// Whether the retry executor may recover from this failure locally.
    ///
    /// True iff the kind is transient (network, timeout, rate limit, server)
    /// and the status is not a permanent server condition (501, 505).
    pub fn is_retryable(&self) -> bool {
        let transient = matches!(
            self.kind,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Server
        );
        transient && !matches!(self.status, Some(501) | Some(505))
    }

    pub fn is_circuit_open(&self) -> bool {
        self.kind == ErrorKind::CircuitOpen
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    pub fn is_rate_limit(&self) -> bool {
        self.kind == ErrorKind::RateLimit
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    // ── Shorthand constructors ──────────────────────────────────────────

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Stream, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    /// Classify a non-2xx HTTP response into an error.
    ///
    /// The body is mined best-effort for a human-readable message; the
    /// `Retry-After` header is honored on 429 and 503.
    pub fn classify(status: u16, body: &str, headers: &HeaderMap) -> Self {
        let message = extract_message(body)
            .unwrap_or_else(|| format!("request failed with status {status}"));
        let retry_after = parse_retry_after(headers);

        let mut err = match status {
            400 => Self::new(ErrorKind::Validation, message),
            401 | 403 => Self::new(ErrorKind::Authentication, message),
            404 => Self::new(ErrorKind::NotFound, message),
            409 => Self::new(ErrorKind::Conflict, message),
            429 => {
                let mut e = Self::new(ErrorKind::RateLimit, message);
                if let Some(delay) = retry_after {
                    e = e.with_retry_after(delay);
                }
                e
            }
            500 | 502 | 504 => Self::new(ErrorKind::Server, message),
            503 => {
                let mut e = Self::new(ErrorKind::Server, message);
                if let Some(delay) = retry_after {
                    e = e.with_retry_after(delay);
                }
                e
            }
            s if (400..500).contains(&s) => Self::new(ErrorKind::Validation, message),
            _ => Self::new(ErrorKind::Server, message),
        };
        err.status = Some(status);
        err
    }

    /// Map an RFC 6749 §5.2 token-endpoint error code.
    pub fn from_token_error(error: &str, description: Option<&str>, status: u16) -> Self {
        let message = description
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("token endpoint returned {error}"));

        let err = match error {
            "invalid_client" => Self::new(ErrorKind::Authentication, message),
            // The grant is no longer valid; the user must re-authorize.
            "invalid_grant" => {
                Self::new(ErrorKind::Authentication, message).with_code("reauthorization_required")
            }
            "invalid_request" | "invalid_scope" | "unauthorized_client"
            | "unsupported_grant_type" => Self::new(ErrorKind::Validation, message),
            "server_error" | "temporarily_unavailable" => Self::new(ErrorKind::Server, message),
            _ => Self::new(ErrorKind::Authentication, message),
        };
        err.with_status(status)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}: {} (status {status})", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serialization, e.to_string()).with_source(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else if e.is_decode() || e.is_body() {
            ErrorKind::Protocol
        } else {
            ErrorKind::Network
        };
        Self::new(kind, e.to_string()).with_source(e)
    }
}

/// Parse `Retry-After` as delay-seconds. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Best-effort extraction of a message from a JSON error body.
///
/// Checks `message`, `error`, `error_description`, then a joined `errors[]`.
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;

    for key in ["message", "error", "error_description"] {
        if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }

    let errors = value.get("errors")?.as_array()?;
    let joined: Vec<&str> = errors.iter().filter_map(|e| e.as_str()).collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, RETRY_AFTER};

    #[test]
    fn status_table_maps_to_kinds() {
        let headers = HeaderMap::new();
        assert_eq!(Error::classify(400, "", &headers).kind(), ErrorKind::Validation);
        assert_eq!(Error::classify(401, "", &headers).kind(), ErrorKind::Authentication);
        assert_eq!(Error::classify(403, "", &headers).kind(), ErrorKind::Authentication);
        assert_eq!(Error::classify(404, "", &headers).kind(), ErrorKind::NotFound);
        assert_eq!(Error::classify(409, "", &headers).kind(), ErrorKind::Conflict);
        assert_eq!(Error::classify(429, "", &headers).kind(), ErrorKind::RateLimit);
        assert_eq!(Error::classify(500, "", &headers).kind(), ErrorKind::Server);
        assert_eq!(Error::classify(502, "", &headers).kind(), ErrorKind::Server);
        assert_eq!(Error::classify(503, "", &headers).kind(), ErrorKind::Server);
        assert_eq!(Error::classify(504, "", &headers).kind(), ErrorKind::Server);
        assert_eq!(Error::classify(418, "", &headers).kind(), ErrorKind::Validation);
        assert_eq!(Error::classify(507, "", &headers).kind(), ErrorKind::Server);
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let err = Error::classify(429, "", &headers);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        let err = Error::classify(503, "", &headers);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        // Other server errors ignore the header.
        let err = Error::classify(500, "", &headers);
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn body_message_extraction_prefers_message_field() {
        let headers = HeaderMap::new();
        let err = Error::classify(400, r#"{"message":"bad field","error":"x"}"#, &headers);
        assert_eq!(err.message(), "bad field");

        let err = Error::classify(400, r#"{"error":"invalid"}"#, &headers);
        assert_eq!(err.message(), "invalid");

        let err = Error::classify(400, r#"{"error_description":"detail"}"#, &headers);
        assert_eq!(err.message(), "detail");

        let err = Error::classify(400, r#"{"errors":["a","b"]}"#, &headers);
        assert_eq!(err.message(), "a; b");

        let err = Error::classify(400, "not json", &headers);
        assert_eq!(err.message(), "request failed with status 400");
    }

    #[test]
    fn retryable_kinds() {
        assert!(Error::network("x").is_retryable());
        assert!(Error::timeout("x").is_retryable());
        assert!(Error::new(ErrorKind::RateLimit, "x").is_retryable());
        assert!(Error::new(ErrorKind::Server, "x").is_retryable());

        assert!(!Error::validation("x").is_retryable());
        assert!(!Error::authentication("x").is_retryable());
        assert!(!Error::new(ErrorKind::CircuitOpen, "x").is_retryable());
        assert!(!Error::cancelled().is_retryable());
    }

    #[test]
    fn not_implemented_statuses_are_not_retryable() {
        assert!(!Error::new(ErrorKind::Server, "x").with_status(501).is_retryable());
        assert!(!Error::new(ErrorKind::Server, "x").with_status(505).is_retryable());
        assert!(Error::new(ErrorKind::Server, "x").with_status(503).is_retryable());
    }

    #[test]
    fn token_error_mapping() {
        let err = Error::from_token_error("invalid_client", None, 401);
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let err = Error::from_token_error("invalid_grant", Some("expired"), 400);
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.code(), Some("reauthorization_required"));
        assert_eq!(err.message(), "expired");

        for code in ["invalid_request", "invalid_scope", "unauthorized_client", "unsupported_grant_type"] {
            assert_eq!(Error::from_token_error(code, None, 400).kind(), ErrorKind::Validation);
        }

        let err = Error::from_token_error("temporarily_unavailable", None, 503);
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(err.is_retryable());
    }

    #[test]
    fn display_includes_kind_and_status() {
        let err = Error::authentication("bad credentials").with_status(401);
        let text = err.to_string();
        assert!(text.contains("authentication"));
        assert!(text.contains("401"));
    }
}
