//! Webhook intake: validation and typed dispatch.
//!
//! The validator runs a fixed check order: payload size, then the token
//! header (constant-time against every expected token, supporting
//! rotation), then an optional IP allowlist with CIDR support. Every
//! failure collapses into one opaque error so callers cannot probe which
//! check tripped. The handler parses the event envelope and dispatches each
//! registered callback sequentially in registration order.

use crate::error::{Error, ErrorKind};
use crate::secret::Secret;
use ipnetwork::IpNetwork;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Default payload cap: 1 MiB.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct WebhookValidatorConfig {
    /// Header carrying the provider's webhook token (e.g. `X-Gitlab-Token`).
    pub token_header: String,
    /// Accepted tokens; more than one supports rotation.
    pub expected_tokens: Vec<Secret>,
    /// When non-empty, the source IP must match one entry.
    pub allowed_ips: Vec<IpNetwork>,
    pub max_payload_bytes: usize,
}

impl WebhookValidatorConfig {
    pub fn new(token_header: impl Into<String>, expected_tokens: Vec<Secret>) -> Result<Self, Error> {
        if expected_tokens.is_empty() {
            return Err(Error::configuration("webhook validator needs at least one token"));
        }
        Ok(Self {
            token_header: token_header.into(),
            expected_tokens,
            allowed_ips: Vec::new(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        })
    }

    pub fn with_allowed_ips(mut self, allowed: Vec<IpNetwork>) -> Self {
        self.allowed_ips = allowed;
        self
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }
}

/// Inbound webhook request as handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Header names are matched case-insensitively.
    pub headers: HashMap<String, String>,
    pub body: WebhookBody,
    pub source_ip: Option<IpAddr>,
}

/// Raw or already-parsed payload.
#[derive(Debug, Clone)]
pub enum WebhookBody {
    Raw(String),
    Parsed(serde_json::Value),
}

impl WebhookRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn payload_len(&self) -> usize {
        match &self.body {
            WebhookBody::Raw(raw) => raw.len(),
            WebhookBody::Parsed(value) => value.to_string().len(),
        }
    }
}

/// Validates inbound webhook requests.
#[derive(Debug, Clone)]
pub struct WebhookValidator {
    config: WebhookValidatorConfig,
}

impl WebhookValidator {
    pub fn new(config: WebhookValidatorConfig) -> Self {
        Self { config }
    }

    /// Run all checks in order. Every failure maps to the same opaque
    /// error; the reason is only logged server-side.
    pub fn validate(&self, request: &WebhookRequest) -> Result<(), Error> {
        if request.payload_len() > self.config.max_payload_bytes {
            tracing::warn!(
                size = request.payload_len(),
                max = self.config.max_payload_bytes,
                "webhook payload exceeds size cap"
            );
            return Err(rejection());
        }

        let presented = request.header(&self.config.token_header);
        if !self.token_matches(presented) {
            tracing::warn!(header = %self.config.token_header, "webhook token mismatch");
            return Err(rejection());
        }

        if !self.config.allowed_ips.is_empty() {
            if let Some(ip) = request.source_ip {
                if !self.config.allowed_ips.iter().any(|net| net.contains(ip)) {
                    tracing::warn!(%ip, "webhook source ip not in allowlist");
                    return Err(rejection());
                }
            }
        }

        Ok(())
    }

    fn token_matches(&self, presented: Option<&str>) -> bool {
        let Some(presented) = presented else {
            // Burn a comparison anyway so the missing-header path is not
            // distinguishable by timing.
            let _ = constant_time_eq(b"missing", b"missing");
            return false;
        };

        let mut matched = false;
        for expected in &self.config.expected_tokens {
            if secure_compare(presented.as_bytes(), expected.expose().as_bytes()) {
                matched = true;
            }
        }
        matched
    }
}

fn rejection() -> Error {
    Error::new(ErrorKind::Authentication, "webhook validation failed")
        .with_code("webhook_validation_failed")
}

/// Compare with constant-time behavior even on length mismatch: unequal
/// lengths still execute a dummy comparison of the presented bytes.
fn secure_compare(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() {
        let _ = constant_time_eq(presented, presented);
        return false;
    }
    constant_time_eq(presented, expected)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    debug_assert_eq!(a.len(), b.len());
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Outcome of processing a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The event kind was recognized and all handlers ran.
    Handled { kind: String, handlers_run: usize },
    /// No handler is registered for the envelope's kind.
    Ignored { kind: Option<String> },
}

/// A decoded event handed to handlers.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// Envelope discriminant (e.g. the `object_kind` value).
    pub kind: String,
    /// Human-readable label from the event-type header, when present.
    pub event_type: Option<String>,
    pub payload: serde_json::Value,
}

type EventHandler = Arc<dyn Fn(&WebhookEvent) -> Result<(), Error> + Send + Sync>;

/// Validates, parses, and dispatches webhook events.
pub struct WebhookHandler {
    validator: WebhookValidator,
    /// Envelope field naming the event kind (e.g. `object_kind`).
    discriminant_key: String,
    /// Header carrying the human-readable event label.
    event_type_header: Option<String>,
    handlers: HashMap<String, Vec<EventHandler>>,
}

impl std::fmt::Debug for WebhookHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookHandler")
            .field("discriminant_key", &self.discriminant_key)
            .field("registered_kinds", &self.handlers.len())
            .finish()
    }
}

impl WebhookHandler {
    pub fn new(validator: WebhookValidator, discriminant_key: impl Into<String>) -> Self {
        Self {
            validator,
            discriminant_key: discriminant_key.into(),
            event_type_header: None,
            handlers: HashMap::new(),
        }
    }

    pub fn with_event_type_header(mut self, header: impl Into<String>) -> Self {
        self.event_type_header = Some(header.into());
        self
    }

    /// Register a handler for an event kind. Handlers for the same kind
    /// run in registration order.
    pub fn on<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&WebhookEvent) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.handlers.entry(kind.into()).or_default().push(Arc::new(handler));
    }

    /// Validate, parse, and dispatch one request.
    ///
    /// Unknown event kinds are ignored, not failed. A handler error stops
    /// dispatch for this request and bubbles up, but handlers stay
    /// registered.
    pub fn process(&self, request: &WebhookRequest) -> Result<WebhookOutcome, Error> {
        self.validator.validate(request)?;

        let payload: serde_json::Value = match &request.body {
            WebhookBody::Parsed(value) => value.clone(),
            WebhookBody::Raw(raw) => serde_json::from_str(raw)
                .map_err(|e| Error::validation(format!("webhook body is not valid JSON: {e}")))?,
        };

        let kind = payload
            .get(&self.discriminant_key)
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned);

        let Some(kind) = kind else {
            tracing::debug!("webhook envelope has no event discriminant, ignoring");
            return Ok(WebhookOutcome::Ignored { kind: None });
        };

        let Some(handlers) = self.handlers.get(&kind) else {
            tracing::debug!(kind, "no handlers registered, ignoring");
            return Ok(WebhookOutcome::Ignored { kind: Some(kind) });
        };

        let event = WebhookEvent {
            kind: kind.clone(),
            event_type: self
                .event_type_header
                .as_deref()
                .and_then(|header| request.header(header))
                .map(ToOwned::to_owned),
            payload,
        };

        for handler in handlers {
            handler(&event)?;
        }

        Ok(WebhookOutcome::Handled { kind, handlers_run: handlers.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn validator(tokens: &[&str]) -> WebhookValidator {
        WebhookValidator::new(
            WebhookValidatorConfig::new(
                "X-Webhook-Token",
                tokens.iter().map(|t| Secret::new(*t)).collect(),
            )
            .unwrap(),
        )
    }

    fn request(token: Option<&str>, body: &str) -> WebhookRequest {
        let mut headers = HashMap::new();
        if let Some(token) = token {
            let _ = headers.insert("x-webhook-token".to_string(), token.to_string());
        }
        WebhookRequest {
            headers,
            body: WebhookBody::Raw(body.to_string()),
            source_ip: None,
        }
    }

    #[test]
    fn accepts_any_rotated_token_case_insensitive_header() {
        let v = validator(&["T1", "T2"]);
        assert!(v.validate(&request(Some("T1"), "{}")).is_ok());
        assert!(v.validate(&request(Some("T2"), "{}")).is_ok());
    }

    #[test]
    fn rejects_wrong_or_missing_token() {
        let v = validator(&["T1", "T2"]);
        let err = v.validate(&request(Some("T3"), "{}")).unwrap_err();
        assert_eq!(err.code(), Some("webhook_validation_failed"));

        let err = v.validate(&request(None, "{}")).unwrap_err();
        assert_eq!(err.code(), Some("webhook_validation_failed"));
    }

    #[test]
    fn rejects_oversized_payload_with_same_error() {
        let v = WebhookValidator::new(
            WebhookValidatorConfig::new("X-Webhook-Token", vec![Secret::new("T1")])
                .unwrap()
                .with_max_payload_bytes(16),
        );
        let err = v
            .validate(&request(Some("T1"), &"x".repeat(32)))
            .unwrap_err();
        assert_eq!(err.code(), Some("webhook_validation_failed"));
    }

    #[test]
    fn ip_allowlist_supports_cidr_and_exact() {
        let config = WebhookValidatorConfig::new("X-Webhook-Token", vec![Secret::new("T1")])
            .unwrap()
            .with_allowed_ips(vec![
                "10.0.0.0/8".parse().unwrap(),
                "192.168.1.7/32".parse().unwrap(),
            ]);
        let v = WebhookValidator::new(config);

        let mut ok = request(Some("T1"), "{}");
        ok.source_ip = Some("10.1.2.3".parse().unwrap());
        assert!(v.validate(&ok).is_ok());

        let mut exact = request(Some("T1"), "{}");
        exact.source_ip = Some("192.168.1.7".parse().unwrap());
        assert!(v.validate(&exact).is_ok());

        let mut bad = request(Some("T1"), "{}");
        bad.source_ip = Some("172.16.0.1".parse().unwrap());
        assert_eq!(
            v.validate(&bad).unwrap_err().code(),
            Some("webhook_validation_failed")
        );
    }

    #[test]
    fn requests_without_ip_skip_the_allowlist() {
        let config = WebhookValidatorConfig::new("X-Webhook-Token", vec![Secret::new("T1")])
            .unwrap()
            .with_allowed_ips(vec!["10.0.0.0/8".parse().unwrap()]);
        let v = WebhookValidator::new(config);
        assert!(v.validate(&request(Some("T1"), "{}")).is_ok());
    }

    #[test]
    fn empty_token_set_is_a_configuration_error() {
        let err = WebhookValidatorConfig::new("X-Webhook-Token", Vec::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn handler_dispatches_in_registration_order() {
        let mut handler = WebhookHandler::new(validator(&["T1"]), "object_kind")
            .with_event_type_header("X-Event-Type");

        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();
        handler.on("push", move |event| {
            first.lock().unwrap().push(format!("first:{}", event.kind));
            Ok(())
        });
        handler.on("push", move |event| {
            second
                .lock()
                .unwrap()
                .push(format!("second:{:?}", event.event_type));
            Ok(())
        });

        let mut req = request(Some("T1"), r#"{"object_kind":"push","ref":"main"}"#);
        let _ = req
            .headers
            .insert("X-Event-Type".to_string(), "Push Hook".to_string());

        let outcome = handler.process(&req).unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Handled { kind: "push".to_string(), handlers_run: 2 }
        );
        assert_eq!(
            order.lock().unwrap().clone(),
            vec![
                "first:push".to_string(),
                "second:Some(\"Push Hook\")".to_string()
            ]
        );
    }

    #[test]
    fn unknown_kind_is_ignored_not_failed() {
        let handler = WebhookHandler::new(validator(&["T1"]), "object_kind");
        let outcome = handler
            .process(&request(Some("T1"), r#"{"object_kind":"merge_request"}"#))
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored { kind: Some("merge_request".to_string()) }
        );

        let outcome = handler
            .process(&request(Some("T1"), r#"{"other":"shape"}"#))
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored { kind: None });
    }

    #[test]
    fn handler_error_bubbles_but_registration_survives() {
        let mut handler = WebhookHandler::new(validator(&["T1"]), "object_kind");
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        handler.on("push", move |_| {
            *counter.lock().unwrap() += 1;
            Err(Error::validation("handler exploded"))
        });

        let req = request(Some("T1"), r#"{"object_kind":"push"}"#);
        assert!(handler.process(&req).is_err());
        // Still registered: a second delivery invokes it again.
        assert!(handler.process(&req).is_err());
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn parsed_body_is_accepted() {
        let mut handler = WebhookHandler::new(validator(&["T1"]), "object_kind");
        handler.on("note", |_| Ok(()));

        let mut headers = HashMap::new();
        let _ = headers.insert("X-Webhook-Token".to_string(), "T1".to_string());
        let req = WebhookRequest {
            headers,
            body: WebhookBody::Parsed(serde_json::json!({"object_kind": "note"})),
            source_ip: None,
        };
        assert_eq!(
            handler.process(&req).unwrap(),
            WebhookOutcome::Handled { kind: "note".to_string(), handlers_run: 1 }
        );
    }

    #[test]
    fn invalid_json_body_is_a_validation_error() {
        let handler = WebhookHandler::new(validator(&["T1"]), "object_kind");
        let err = handler
            .process(&request(Some("T1"), "not json"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"diff"));
        assert!(!secure_compare(b"short", b"longer-token"));
    }
}
