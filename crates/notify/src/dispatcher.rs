//! Fans notifications out to every configured sink.
//!
//! Sinks are tried in registration order. Individual sink failures don't
//! block other sinks, and nothing is retried here.

use std::collections::HashSet;

use crate::traits::{DispatchResult, Notification, Sink, SinkError};

/// Per-sink outcomes of one publish, in sink registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub results: Vec<DispatchResult>,
}

impl DispatchReport {
    pub fn get(&self, sink_id: &str) -> Option<&DispatchResult> {
        self.results.iter().find(|r| r.sink == sink_id)
    }

    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.delivered()
    }

    /// True when at least one sink accepted the notification.
    pub fn any_delivered(&self) -> bool {
        self.results.iter().any(|r| r.success)
    }
}

/// Delivers notifications to a fixed set of sinks.
pub struct Dispatcher {
    sinks: Vec<Box<dyn Sink>>,
}

impl Dispatcher {
    /// Create a dispatcher. Sink ids must be unique.
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Result<Self, SinkError> {
        let mut seen = HashSet::new();
        for sink in &sinks {
            if !seen.insert(sink.id().to_string()) {
                return Err(SinkError::Config(format!("duplicate sink id '{}'", sink.id())));
            }
        }
        Ok(Self { sinks })
    }

    pub fn sink_ids(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.id()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver `notification` to every sink and report each outcome.
    pub async fn publish(&self, notification: &Notification) -> DispatchReport {
        if self.sinks.is_empty() {
            tracing::debug!(title = %notification.title, "No sinks configured");
            return DispatchReport::default();
        }

        let mut results = Vec::with_capacity(self.sinks.len());

        for sink in &self.sinks {
            let start = std::time::Instant::now();
            let result = sink.publish(notification).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, error) = match result {
                Ok(()) => {
                    tracing::info!(
                        sink = sink.id(),
                        title = %notification.title,
                        duration_ms,
                        "Notification delivered"
                    );
                    (true, None)
                }
                Err(e) => {
                    tracing::warn!(
                        sink = sink.id(),
                        title = %notification.title,
                        error = %e,
                        duration_ms,
                        "Notification delivery failed"
                    );
                    (false, Some(e.to_string()))
                }
            };

            results.push(DispatchResult {
                sink: sink.id().to_string(),
                success,
                error,
                duration_ms,
            });
        }

        DispatchReport { results }
    }
}
