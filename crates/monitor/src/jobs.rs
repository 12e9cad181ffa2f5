//! The closed set of job kinds the monitor schedules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ecoalert_notify::{Dispatcher, Notification};
use ecoalert_scheduler::{FiringContext, JobBody, JobError};
use tracing::info;

use crate::pipeline::{Pipeline, WatchSpec};

/// Publishes the next message of a fixed list on each firing, wrapping
/// around at the end.
pub struct Broadcast {
    job_id: String,
    title: String,
    messages: Vec<String>,
    next: AtomicUsize,
    dispatcher: Arc<Dispatcher>,
}

impl Broadcast {
    pub fn new(
        job_id: impl Into<String>,
        title: impl Into<String>,
        messages: Vec<String>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            title: title.into(),
            messages,
            next: AtomicUsize::new(0),
            dispatcher,
        }
    }

    async fn publish_next(&self, ctx: &FiringContext) -> Result<(), JobError> {
        if self.messages.is_empty() {
            return Ok(());
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.messages.len();
        let notification = Notification::message(&self.title, &self.messages[index])
            .with_metadata("job_id", &self.job_id)
            .with_metadata("firing", ctx.firing.to_string());

        let report = self.dispatcher.publish(&notification).await;
        info!(job_id = %self.job_id, index, delivered = report.delivered(), "Broadcast published");
        if report.failed() > 0 && !report.any_delivered() {
            return Err(JobError::new(format!(
                "broadcast '{}' was rejected by every sink",
                self.job_id
            )));
        }
        Ok(())
    }
}

/// A scheduled unit of work.
pub enum MonitorJob {
    /// Poll subjects through the pipeline.
    Watch {
        pipeline: Arc<Pipeline>,
        spec: WatchSpec,
    },
    /// Publish a rotating message; no sources, rules or dedup involved.
    Broadcast(Broadcast),
}

#[async_trait::async_trait]
impl JobBody for MonitorJob {
    async fn run(&self, ctx: &FiringContext) -> Result<(), JobError> {
        match self {
            MonitorJob::Watch { pipeline, spec } => {
                let report = pipeline.run_watch(spec, ctx).await;
                if report.checked == 0 && !report.failed.is_empty() {
                    return Err(JobError::new(format!(
                        "all {} subjects failed to fetch",
                        report.failed.len()
                    )));
                }
                Ok(())
            }
            MonitorJob::Broadcast(broadcast) => broadcast.publish_next(ctx).await,
        }
    }
}
