//! The weather monitor: wires sources, rules, dedup, sinks and the scheduler
//! into one pipeline driven by configured jobs.

pub mod app;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod pipeline;

pub use app::Monitor;
pub use error::MonitorError;
pub use jobs::{Broadcast, MonitorJob};
pub use pipeline::{Pipeline, SubjectReport, WatchReport, WatchSpec};
