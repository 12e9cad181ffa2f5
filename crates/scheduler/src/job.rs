//! Jobs, their state machine, and the body trait.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::JobError;
use crate::recurrence::Recurrence;

/// Lifecycle of a job.
///
/// `Idle -> Running -> Idle` on each firing; `Idle | Running -> Cancelled`
/// on shutdown. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Running = 1,
    Cancelled = 2,
}

impl JobState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => JobState::Idle,
            1 => JobState::Running,
            _ => JobState::Cancelled,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Running => write!(f, "running"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lock-free holder for a [`JobState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(JobState::Idle as u8))
    }

    pub(crate) fn load(&self) -> JobState {
        JobState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Idle -> Running`. False if the job is running or cancelled.
    pub(crate) fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(
                JobState::Idle as u8,
                JobState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Running -> Idle`. A cancelled job stays cancelled.
    pub(crate) fn finish(&self) {
        let _ = self.0.compare_exchange(
            JobState::Running as u8,
            JobState::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn cancel(&self) {
        self.0.store(JobState::Cancelled as u8, Ordering::Release);
    }
}

/// What a firing knows about itself.
#[derive(Debug, Clone)]
pub struct FiringContext {
    pub job_id: String,
    /// 1-based count of firings started for this job.
    pub firing: u64,
    pub fired_at: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
}

impl FiringContext {
    pub(crate) fn new(
        job_id: &str,
        firing: u64,
        fired_at: DateTime<Utc>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            firing,
            fired_at,
            cancelled,
        }
    }

    /// A standalone context, for running a body outside a scheduler.
    pub fn detached(job_id: &str, firing: u64) -> Self {
        Self::new(job_id, firing, Utc::now(), Arc::new(AtomicBool::new(false)))
    }

    /// True once shutdown was requested. Bodies check this between units of
    /// work and stop taking on new ones.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation for this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// The business logic a job runs on each firing.
#[async_trait::async_trait]
pub trait JobBody: Send + Sync + 'static {
    async fn run(&self, ctx: &FiringContext) -> Result<(), JobError>;
}

/// A job definition: id, recurrence, body.
#[derive(Debug)]
pub struct Job<B> {
    pub id: String,
    pub recurrence: Recurrence,
    pub body: B,
}

impl<B: JobBody> Job<B> {
    pub fn new(id: impl Into<String>, recurrence: Recurrence, body: B) -> Self {
        Self {
            id: id.into(),
            recurrence,
            body,
        }
    }
}
