//! Scheduler error types.

/// Errors raised while building or starting a scheduler.
///
/// All of these surface before any job fires.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("job '{0}' needs exactly one of an interval or a cron expression")]
    AmbiguousRecurrence(String),

    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("scheduler already started")]
    AlreadyStarted,
}

/// Failure reported by a job body for one firing.
///
/// Logged and counted; never stops the scheduler.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
