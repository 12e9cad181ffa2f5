use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity attached to a rule and carried by every alert it raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A rule match against one snapshot, waiting for dedup and dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub source_subject: String,
    pub rule_id: String,
    pub severity: Severity,
    pub raised_at: DateTime<Utc>,
    pub message: String,
}

impl Alert {
    /// The `(subject, rule)` pair that identifies this alert for dedup.
    pub fn dedup_key(&self) -> (String, String) {
        (self.source_subject.clone(), self.rule_id.clone())
    }
}
