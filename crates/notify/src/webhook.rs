//! Generic HTTP webhook sink.
//!
//! Delivers notifications as JSON payloads to a configured URL with
//! optional custom headers. The payload carries a `content` field holding
//! the plain-text rendering, which chat webhooks (e.g. Discord) display
//! directly, plus the structured notification.

use std::collections::HashMap;
use std::time::Duration;

use ecoalert_core::config::resolve_env_vars;
use serde::Serialize;

use crate::traits::{Notification, Sink, SinkError};

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: String,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// Request deadline when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_client(timeout: Duration) -> Result<reqwest::Client, SinkError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Posts each notification to one URL, e.g. a Discord channel webhook.
///
/// `${VAR_NAME}` references in the URL and header values are expanded once,
/// when the sink is built. Every request is bounded by a timeout covering
/// connect through body, [`DEFAULT_TIMEOUT`] unless set with
/// [`WebhookSink::with_timeout`]; an expired request is a [`SinkError::Http`].
#[derive(Debug)]
pub struct WebhookSink {
    id: String,
    url: String,
    method: reqwest::Method,
    headers: HashMap<String, String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookSink {
    /// Create a new webhook sink. `method` defaults to `POST`.
    pub fn new(
        id: impl Into<String>,
        url: &str,
        method: Option<reqwest::Method>,
        headers: HashMap<String, String>,
    ) -> Result<Self, SinkError> {
        let id = id.into();
        let resolved_url =
            resolve_env_vars(url).map_err(|e| SinkError::Config(format!("sink '{id}': {e}")))?;

        let mut resolved_headers = HashMap::with_capacity(headers.len());
        for (key, value) in &headers {
            let value = resolve_env_vars(value)
                .map_err(|e| SinkError::Config(format!("sink '{id}' header '{key}': {e}")))?;
            resolved_headers.insert(key.clone(), value);
        }

        Ok(Self {
            id,
            url: resolved_url,
            method: method.unwrap_or(reqwest::Method::POST),
            headers: resolved_headers,
            timeout: DEFAULT_TIMEOUT,
            client: build_client(DEFAULT_TIMEOUT)?,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, SinkError> {
        if timeout.is_zero() {
            return Err(SinkError::Config(format!("sink '{}': timeout must be > 0", self.id)));
        }
        self.client = build_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Construct from config-level primitives; `method` is parsed
    /// case-insensitively (e.g. `"post"`, `"PUT"`).
    pub fn from_config(
        id: impl Into<String>,
        url: &str,
        method: Option<&str>,
        headers: HashMap<String, String>,
    ) -> Result<Self, SinkError> {
        let parsed_method = match method {
            Some(m) => Some(
                m.to_uppercase()
                    .parse::<reqwest::Method>()
                    .map_err(|_| SinkError::Config(format!("invalid HTTP method: {m}")))?,
            ),
            None => None,
        };
        Self::new(id, url, parsed_method, headers)
    }
}

#[async_trait::async_trait]
impl Sink for WebhookSink {
    async fn publish(&self, notification: &Notification) -> Result<(), SinkError> {
        let payload = WebhookPayload {
            content: notification.text(),
            notification,
        };

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .json(&payload);

        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body not readable>".to_string());
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(
            sink = %self.id,
            method = %self.method,
            %status,
            "Webhook accepted notification"
        );

        Ok(())
    }

    fn id(&self) -> &str {
        &self.id
    }
}
