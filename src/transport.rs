//! HTTP transport: unary request/response and SSE streaming.
//!
//! The transport owns a shared `reqwest` client with the SDK identity,
//! per-call timeout, and an optional credential provider that injects
//! `Authorization`. Non-2xx unary responses are returned to the caller for
//! classification; streaming failures surface as terminal `stream` errors.

use crate::credentials::CredentialProvider;
use crate::error::{Error, ErrorKind};
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// SDK identity attached to every request.
pub const DEFAULT_USER_AGENT: &str = concat!("keel/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub user_agent: String,
    /// Total per-request deadline.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `None` for the default `message` type.
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    /// Server-suggested reconnect delay.
    pub retry: Option<Duration>,
}

/// Finite stream of SSE events. Not restartable.
pub type SseEventStream = BoxStream<'static, Result<SseEvent, Error>>;

/// Unary response handed back for classification.
#[derive(Debug)]
pub struct TransportResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl TransportResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(Error::from)
    }

    /// Classify a non-2xx response into an error, passing 2xx through.
    pub fn error_for_status(self) -> Result<Self, Error> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.classify())
        }
    }

    /// Map this response through the shared status/body/header table.
    pub fn classify(&self) -> Error {
        Error::classify(self.status, &self.text(), &self.headers)
    }
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    credentials: Option<Arc<dyn CredentialProvider>>,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            credentials: None,
            cancellation: CancellationToken::new(),
        })
    }

    /// Inject `Authorization` from `provider` on every request.
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Cancelling `token` aborts in-flight requests and open streams.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Issue a unary request.
    ///
    /// Fails with `network` on connect/DNS errors, `timeout` when the
    /// deadline fires, `protocol` on a malformed response, `cancelled` on
    /// caller cancellation. Non-2xx statuses are returned, not errors.
    #[tracing::instrument(skip_all, fields(%method, url))]
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<&serde_json::Value>,
    ) -> Result<TransportResponse, Error> {
        let url = parse_url(url)?;
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(json) = body {
            request = request
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .json(json);
        }
        request = self.authorize(request).await?;

        let response = tokio::select! {
            () = self.cancellation.cancelled() => return Err(Error::cancelled()),
            result = request.send() => result.map_err(Error::from)?,
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = tokio::select! {
            () = self.cancellation.cancelled() => return Err(Error::cancelled()),
            result = response.bytes() => result.map_err(Error::from)?,
        };

        tracing::debug!(status, bytes = body.len(), "response received");
        Ok(TransportResponse { status, headers, body })
    }

    /// Like [`send`](Self::send), but on a 401 refreshes the credential
    /// and re-issues the request once before surfacing.
    ///
    /// A failed refresh surfaces as `authentication` with the
    /// `refresh_failed` code. Without a credential provider this behaves
    /// exactly like `send`.
    pub async fn send_with_refresh(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<&serde_json::Value>,
    ) -> Result<TransportResponse, Error> {
        let response = self
            .send(method.clone(), url, headers.clone(), body)
            .await?;
        if response.status() != 401 {
            return Ok(response);
        }
        let Some(provider) = &self.credentials else {
            return Ok(response);
        };

        tracing::debug!("401 received, refreshing credentials and retrying once");
        if let Err(e) = provider.refresh().await {
            return Err(Error::authentication("credential refresh after 401 failed")
                .with_code("refresh_failed")
                .with_source(e));
        }
        self.send(method, url, headers, body).await
    }

    /// Open an SSE stream.
    ///
    /// A non-2xx handshake classifies like a unary response. Mid-stream
    /// failures end the stream with a single terminal `stream` error.
    /// Events with empty data are skipped. The underlying connection is
    /// released when the stream is dropped, completes, or is cancelled.
    #[tracing::instrument(skip_all, fields(%method, url))]
    pub async fn stream(
        &self,
        method: Method,
        url: &str,
        mut headers: HeaderMap,
        body: Option<&serde_json::Value>,
    ) -> Result<SseEventStream, Error> {
        let url = parse_url(url)?;
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(json) = body {
            request = request
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .json(json);
        }
        request = self.authorize(request).await?;

        let response = tokio::select! {
            () = self.cancellation.cancelled() => return Err(Error::cancelled()),
            result = request.send() => result.map_err(Error::from)?,
        };

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let headers = response.headers().clone();
            let body = response.bytes().await.unwrap_or_default();
            return Err(Error::classify(
                status,
                &String::from_utf8_lossy(&body),
                &headers,
            ));
        }

        let cancellation = self.cancellation.clone();
        let mut events = Box::pin(response.bytes_stream().eventsource());
        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    () = cancellation.cancelled() => {
                        yield Err(Error::cancelled());
                        break;
                    }
                    next = events.next() => next,
                };
                match next {
                    Some(Ok(event)) => {
                        if event.data.is_empty() {
                            continue;
                        }
                        yield Ok(SseEvent {
                            event: if event.event.is_empty() || event.event == "message" {
                                None
                            } else {
                                Some(event.event)
                            },
                            data: event.data,
                            id: if event.id.is_empty() { None } else { Some(event.id) },
                            retry: event.retry,
                        });
                    }
                    Some(Err(e)) => {
                        yield Err(Error::new(
                            ErrorKind::Stream,
                            format!("event stream failed: {e}"),
                        ));
                        break;
                    }
                    None => break,
                }
            }
        };
        Ok(stream.boxed())
    }

    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, Error> {
        let Some(provider) = &self.credentials else {
            return Ok(request);
        };
        let value = provider.authorization_value().await?;
        let header = HeaderValue::from_str(&value)
            .map_err(|_| Error::configuration("credential produced an invalid header value"))?;
        Ok(request.header(AUTHORIZATION, header))
    }
}

fn parse_url(url: &str) -> Result<Url, Error> {
    Url::parse(url).map_err(|e| Error::validation(format!("invalid url {url:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_is_a_validation_error() {
        let err = parse_url("not a url").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn user_agent_carries_crate_version() {
        assert!(DEFAULT_USER_AGENT.starts_with("keel/"));
    }

    #[test]
    fn response_helpers() {
        let response = TransportResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{\"ok\":true}"),
        };
        assert!(response.is_success());
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn error_for_status_classifies_failures() {
        let response = TransportResponse {
            status: 404,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{\"message\":\"missing\"}"),
        };
        let err = response.error_for_status().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "missing");
    }
}
