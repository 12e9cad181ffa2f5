//! Sink that writes notifications to the tracing log.

use ecoalert_core::Severity;

use crate::traits::{Notification, Sink, SinkError};

/// Emits each notification as a structured `tracing` event.
///
/// Critical notifications log at `warn`, everything else at `info`.
#[derive(Debug, Clone)]
pub struct LogSink {
    id: String,
}

impl LogSink {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait::async_trait]
impl Sink for LogSink {
    async fn publish(&self, notification: &Notification) -> Result<(), SinkError> {
        let severity = notification
            .severity
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());
        match notification.severity {
            Some(Severity::Critical) => tracing::warn!(
                sink = %self.id,
                severity = %severity,
                title = %notification.title,
                body = %notification.body,
                "alert"
            ),
            _ => tracing::info!(
                sink = %self.id,
                severity = %severity,
                title = %notification.title,
                body = %notification.body,
                "notification"
            ),
        }
        Ok(())
    }

    fn id(&self) -> &str {
        &self.id
    }
}
