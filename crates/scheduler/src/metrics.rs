use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::JobState;

/// Counters for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobMetrics {
    /// Firings that started running.
    pub fired: u64,
    /// Firings skipped because the previous one was still running.
    pub skipped_overlap: u64,
    /// Firings whose body returned `Ok`.
    pub completed: u64,
    /// Firings whose body returned an error or panicked.
    pub failed: u64,
    pub last_fired: Option<DateTime<Utc>>,
    pub last_duration: Option<Duration>,
}

/// Scheduler operational metrics, keyed by job id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    pub jobs: BTreeMap<String, JobMetrics>,
    pub states: BTreeMap<String, JobState>,
}

impl SchedulerMetrics {
    pub fn job(&self, id: &str) -> Option<&JobMetrics> {
        self.jobs.get(id)
    }

    pub(crate) fn record_fired(&mut self, job_id: &str, at: DateTime<Utc>) {
        let m = self.jobs.entry(job_id.to_string()).or_default();
        m.fired += 1;
        m.last_fired = Some(at);
    }

    pub(crate) fn record_skipped(&mut self, job_id: &str) {
        self.jobs.entry(job_id.to_string()).or_default().skipped_overlap += 1;
    }

    pub(crate) fn record_finished(&mut self, job_id: &str, ok: bool, duration: Duration) {
        let m = self.jobs.entry(job_id.to_string()).or_default();
        if ok {
            m.completed += 1;
        } else {
            m.failed += 1;
        }
        m.last_duration = Some(duration);
    }
}
