//! Cool-down based alert suppression.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ecoalert_core::Alert;
use tracing::debug;

/// Remembers when each `(subject, rule)` pair last fired.
///
/// An alert is admitted when its pair has never fired, or fired at least
/// `cool_down` ago. Suppression leaves the state untouched.
#[derive(Debug, Default)]
pub struct Deduplicator {
    last_fired: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(String, String), DateTime<Utc>>> {
        self.last_fired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit or suppress `alert` against the current wall clock.
    pub fn admit(&self, alert: &Alert, cool_down: Duration) -> bool {
        self.admit_at(alert, cool_down, Utc::now())
    }

    /// Admit or suppress `alert` as of `now`.
    ///
    /// A `now` earlier than the recorded fire time counts as zero elapsed.
    pub fn admit_at(&self, alert: &Alert, cool_down: Duration, now: DateTime<Utc>) -> bool {
        let key = alert.dedup_key();
        let mut entries = self.entries();

        if let Some(last) = entries.get(&key) {
            let elapsed = now.signed_duration_since(*last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < cool_down {
                debug!(
                    subject = %alert.source_subject,
                    rule_id = %alert.rule_id,
                    remaining_secs = (cool_down - elapsed).as_secs(),
                    "Alert suppressed by cool-down"
                );
                return false;
            }
        }

        entries.insert(key, now);
        true
    }

    /// Drop the record for `alert`'s pair, so the next occurrence is admitted.
    ///
    /// Used when an admitted alert could not be delivered anywhere.
    pub fn forget(&self, alert: &Alert) {
        self.entries().remove(&alert.dedup_key());
    }

    /// Last admission time for a pair, if any.
    pub fn last_fired(&self, subject: &str, rule_id: &str) -> Option<DateTime<Utc>> {
        self.entries()
            .get(&(subject.to_string(), rule_id.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
