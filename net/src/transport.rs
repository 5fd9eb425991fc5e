//! HTTP request transport with a default timeout and re-issue on timeout.
//!
//! # Timeout Policy
//!
//! - Default timeout: 5000 ms per exchange
//! - An explicit per-request timeout always wins over the default
//! - Paths on the long-poll denylist get no default timeout and are never
//!   re-issued, since they legitimately run longer
//!
//! # Re-issue on Timeout
//!
//! A timed-out exchange for a non-denylisted path is sent again, once per
//! timeout, up to `max_timeout_reissues` (unbounded when `None`). Every
//! re-issue carries the same `X-Request-Id` so the backend can correlate
//! duplicates. This layer composes with the retry executor; see [`crate::retry`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Timeout applied to every exchange that does not opt out.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Correlation header, stable across timeout re-issues of one request.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

const MAX_ERROR_BODY_CHARS: usize = 256;

/// Uniform failure type for one transport exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid request target '{target}': {message}")]
    InvalidUrl { target: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("undecodable response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl TransportError {
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn from_reqwest(url: &Url, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if error.is_decode() {
            Self::Decode {
                url: url.to_string(),
                message: error.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Base for relative request paths. Always ends with `/`.
    base_url: Url,
    pub default_timeout: Duration,
    /// Path prefixes of long-poll/streaming endpoints.
    pub long_poll_paths: Vec<String>,
    /// `None` re-issues on every timeout.
    pub max_timeout_reissues: Option<u32>,
}

impl TransportSettings {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let mut base_url = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl {
            target: base_url.to_string(),
            message: e.to_string(),
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            long_poll_paths: Vec::new(),
            max_timeout_reissues: None,
        })
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_long_poll_path(mut self, prefix: impl Into<String>) -> Self {
        self.long_poll_paths.push(prefix.into());
        self
    }

    #[must_use]
    pub fn with_max_timeout_reissues(mut self, limit: Option<u32>) -> Self {
        self.max_timeout_reissues = limit;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether `url` targets a long-poll endpoint.
    #[must_use]
    pub fn is_long_poll(&self, url: &Url) -> bool {
        let path = url.path();
        self.long_poll_paths.iter().any(|prefix| {
            let prefix = if prefix.starts_with('/') {
                prefix.clone()
            } else {
                format!("/{prefix}")
            };
            path.starts_with(&prefix)
        })
    }
}

/// A request description that can be sent any number of times.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    method: Method,
    target: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Explicit timeout; disables the transport default for this request.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Shared HTTP transport. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    settings: Arc<TransportSettings>,
}

impl Transport {
    pub fn new(settings: TransportSettings) -> Result<Self, TransportError> {
        let client = crate::http_client_builder()
            .build()
            .map_err(|e| TransportError::Network {
                url: settings.base_url.to_string(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_client(client, settings))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, settings: TransportSettings) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Resolve an absolute URL or a path relative to the base URL.
    pub fn resolve(&self, target: &str) -> Result<Url, TransportError> {
        let invalid = |e: url::ParseError| TransportError::InvalidUrl {
            target: target.to_string(),
            message: e.to_string(),
        };
        match Url::parse(target) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .settings
                .base_url
                .join(target.trim_start_matches('/'))
                .map_err(invalid),
            Err(e) => Err(invalid(e)),
        }
    }

    /// Timeout for one exchange: explicit, else the default unless long-poll.
    #[must_use]
    pub fn effective_timeout(&self, url: &Url, explicit: Option<Duration>) -> Option<Duration> {
        match explicit {
            Some(timeout) => Some(timeout),
            None if self.settings.is_long_poll(url) => None,
            None => Some(self.settings.default_timeout),
        }
    }

    /// Send `request` and decode the body as JSON.
    pub async fn json(&self, request: &TransportRequest) -> Result<Value, TransportError> {
        let url = self.request_url(request)?;
        let body = self.exchange(request, &url).await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Fetch raw bytes, e.g. an image, under the same timeout policy.
    pub async fn bytes(&self, target: &str) -> Result<Vec<u8>, TransportError> {
        let request = TransportRequest::get(target);
        let url = self.request_url(&request)?;
        self.exchange(&request, &url).await
    }

    fn request_url(&self, request: &TransportRequest) -> Result<Url, TransportError> {
        let mut url = self.resolve(&request.target)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    async fn exchange(
        &self,
        request: &TransportRequest,
        url: &Url,
    ) -> Result<Vec<u8>, TransportError> {
        let request_id = Uuid::new_v4().to_string();
        let long_poll = self.settings.is_long_poll(url);
        let timeout = self.effective_timeout(url, request.timeout);
        let mut reissues: u32 = 0;

        loop {
            match self.send_once(request, url, &request_id, timeout).await {
                Err(e) if e.is_timeout() && !long_poll && self.may_reissue(reissues) => {
                    reissues += 1;
                    tracing::debug!(
                        url = %url,
                        request_id = %request_id,
                        reissue = reissues,
                        "Re-issuing request after timeout"
                    );
                }
                result => return result,
            }
        }
    }

    fn may_reissue(&self, reissues: u32) -> bool {
        self.settings
            .max_timeout_reissues
            .is_none_or(|limit| reissues < limit)
    }

    async fn send_once(
        &self,
        request: &TransportRequest,
        url: &Url,
        request_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .header(REQUEST_ID_HEADER, request_id);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, &e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(url, &e))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        Ok(body.to_vec())
    }
}
