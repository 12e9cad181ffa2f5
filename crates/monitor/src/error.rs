use ecoalert_core::ConfigError;
use ecoalert_notify::SinkError;
use ecoalert_rules::RuleError;
use ecoalert_scheduler::SchedulerError;

/// Startup failures. Any of these keeps the monitor from starting.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("rules: {0}")]
    Rules(#[from] RuleError),

    #[error("sinks: {0}")]
    Sink(#[from] SinkError),

    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),
}
