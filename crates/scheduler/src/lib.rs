//! Job scheduling for the monitor.
//!
//! Jobs recur on a fixed interval or a cron expression pinned to a UTC
//! offset. Each job has an Idle/Running/Cancelled state machine: a firing
//! that comes due while the previous one is still running is skipped, and
//! missed firings are never made up. Shutdown is a cooperative drain.

pub mod clock;
pub mod error;
pub mod job;
pub mod metrics;
pub mod recurrence;
pub mod runner;

pub use clock::{Clock, SystemClock};
pub use error::{JobError, SchedulerError};
pub use job::{FiringContext, Job, JobBody, JobState};
pub use metrics::{JobMetrics, SchedulerMetrics};
pub use recurrence::Recurrence;
pub use runner::Scheduler;
