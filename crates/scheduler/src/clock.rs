//! Wall-clock source for cron recurrences.

use chrono::{DateTime, Utc};

/// Supplies the wall-clock time cron jobs are matched against.
///
/// Interval jobs run on the tokio clock and never consult this.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// The system's real-time clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
