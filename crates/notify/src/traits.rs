//! Sink trait definition and shared types.

use std::collections::BTreeMap;

use ecoalert_core::{Alert, Severity};

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sink returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub severity: Option<Severity>,
    /// Additional metadata (e.g. subject, rule_id, job_id).
    pub metadata: BTreeMap<String, String>,
}

impl Notification {
    /// Free-form notification with no severity, e.g. a broadcast message.
    pub fn message(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity: None,
            metadata: BTreeMap::new(),
        }
    }

    /// One notification per alert.
    pub fn from_alert(alert: &Alert) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("subject".to_string(), alert.source_subject.clone());
        metadata.insert("rule_id".to_string(), alert.rule_id.clone());
        metadata.insert("raised_at".to_string(), alert.raised_at.to_rfc3339());
        Self {
            title: format!("[{}] {}", alert.severity, alert.source_subject),
            body: alert.message.clone(),
            severity: Some(alert.severity),
            metadata,
        }
    }

    /// Several alerts joined into one notification, in the given order.
    ///
    /// Severity is the highest among the alerts.
    pub fn digest(title: impl Into<String>, alerts: &[Alert]) -> Self {
        let body = alerts
            .iter()
            .map(|a| a.message.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let mut metadata = BTreeMap::new();
        metadata.insert("alert_count".to_string(), alerts.len().to_string());
        Self {
            title: title.into(),
            body,
            severity: alerts.iter().map(|a| a.severity).max(),
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Title and body as a single plain-text message.
    pub fn text(&self) -> String {
        if self.title.is_empty() {
            self.body.clone()
        } else {
            format!("**{}**\n{}", self.title, self.body)
        }
    }
}

/// Trait for notification sink implementations.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Deliver a notification through this sink.
    async fn publish(&self, notification: &Notification) -> Result<(), SinkError>;

    /// Unique identifier of this sink within a dispatcher.
    fn id(&self) -> &str;
}

/// Result of delivering a notification to a single sink.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub sink: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert(subject: &str, severity: Severity, message: &str) -> Alert {
        Alert {
            source_subject: subject.into(),
            rule_id: "r".into(),
            severity,
            raised_at: Utc::now(),
            message: message.into(),
        }
    }

    #[test]
    fn from_alert_carries_subject_and_rule() {
        let n = Notification::from_alert(&alert("Bogota", Severity::Critical, "hot"));
        assert_eq!(n.title, "[critical] Bogota");
        assert_eq!(n.body, "hot");
        assert_eq!(n.metadata["subject"], "Bogota");
        assert_eq!(n.metadata["rule_id"], "r");
    }

    #[test]
    fn digest_joins_in_order_with_max_severity() {
        let alerts = vec![
            alert("Lima", Severity::Warning, "rain in Lima"),
            alert("Bogota", Severity::Critical, "heat in Bogota"),
        ];
        let n = Notification::digest("Extreme weather", &alerts);
        assert_eq!(n.body, "rain in Lima\nheat in Bogota");
        assert_eq!(n.severity, Some(Severity::Critical));
        assert_eq!(n.metadata["alert_count"], "2");
    }

    #[test]
    fn text_includes_title() {
        assert_eq!(Notification::message("Tip", "Save water").text(), "**Tip**\nSave water");
        assert_eq!(Notification::message("", "Save water").text(), "Save water");
    }
}
