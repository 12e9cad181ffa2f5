//! DataSource trait definition and shared error types.

use std::collections::BTreeMap;
use std::fmt;

use ecoalert_core::Snapshot;

/// Extra query parameters forwarded to a source.
///
/// Ordered so that cache keys derived from it are deterministic.
pub type Params = BTreeMap<String, String>;

/// Classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Connection failure, DNS error or timeout.
    Transport,
    /// The upstream answered with a status we do not treat as success.
    BadStatus,
    /// The upstream answered successfully but the body could not be read.
    MalformedPayload,
    /// No source is registered under the requested id.
    UnknownSource,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Transport => write!(f, "transport"),
            FetchErrorKind::BadStatus => write!(f, "bad status"),
            FetchErrorKind::MalformedPayload => write!(f, "malformed payload"),
            FetchErrorKind::UnknownSource => write!(f, "unknown source"),
        }
    }
}

/// A failed fetch. Never cached, never retried by the source itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} error: {detail}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub detail: String,
    /// HTTP status for [`FetchErrorKind::BadStatus`].
    pub status: Option<u16>,
}

impl FetchError {
    pub fn transport(detail: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transport,
            detail: detail.into(),
            status: None,
        }
    }

    pub fn bad_status(status: u16, detail: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::BadStatus,
            detail: detail.into(),
            status: Some(status),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::MalformedPayload,
            detail: detail.into(),
            status: None,
        }
    }

    pub fn unknown_source(source_id: &str) -> Self {
        Self {
            kind: FetchErrorKind::UnknownSource,
            detail: format!("no source registered as '{source_id}'"),
            status: None,
        }
    }

    /// Transport failures and 5xx responses may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            FetchErrorKind::Transport => true,
            FetchErrorKind::BadStatus => self.status.is_some_and(|s| s >= 500),
            FetchErrorKind::MalformedPayload | FetchErrorKind::UnknownSource => false,
        }
    }
}

/// Trait for upstream data providers.
///
/// Implementations perform exactly one network call per `fetch` and wrap
/// the payload into a [`Snapshot`]. Caching, rate limiting, timeouts and
/// retries are layered on top by [`crate::SourceAdapter`].
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch the current state of `key` (e.g. a city name).
    async fn fetch(&self, key: &str, params: &Params) -> Result<Snapshot, FetchError>;

    /// Identifier used for rate limiting and cache keys (e.g. "openweather").
    fn source_id(&self) -> &str;
}
