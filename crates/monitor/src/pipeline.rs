//! fetch → evaluate → dedup → dispatch, for one subject or a whole watch job.

use std::sync::Arc;
use std::time::Duration;

use ecoalert_core::config::JobConfig;
use ecoalert_core::Alert;
use ecoalert_notify::{DispatchReport, Dispatcher, Notification};
use ecoalert_rules::{Deduplicator, RuleEvaluator, RuleSet};
use ecoalert_scheduler::FiringContext;
use ecoalert_source::{FetchError, Params, SourceAdapter};
use tracing::{debug, info, warn};

/// What a watch job polls on each firing.
#[derive(Debug, Clone)]
pub struct WatchSpec {
    pub job_id: String,
    pub source: String,
    /// Processed in this order.
    pub subjects: Vec<String>,
    pub params: Params,
    /// Join all admitted alerts of a firing into one notification.
    pub digest: bool,
    /// Digest notification title.
    pub title: String,
}

impl WatchSpec {
    pub fn from_config(job: &JobConfig) -> Self {
        Self {
            job_id: job.id.clone(),
            source: job.source.clone().unwrap_or_default(),
            subjects: job.subjects.clone(),
            params: job.params.clone(),
            digest: job.digest,
            title: job.title().to_string(),
        }
    }
}

/// Outcome for one subject.
#[derive(Debug, Clone, Default)]
pub struct SubjectReport {
    pub subject: String,
    /// Alerts that passed dedup, in rule order.
    pub admitted: Vec<Alert>,
    /// Alerts dropped because their cool-down had not elapsed.
    pub suppressed: usize,
    /// One report per published notification. Empty when screening only.
    pub dispatches: Vec<DispatchReport>,
}

/// Outcome of one watch firing.
#[derive(Debug, Default)]
pub struct WatchReport {
    /// Subjects whose snapshot was evaluated.
    pub checked: usize,
    /// Subjects skipped because their fetch failed.
    pub failed: Vec<(String, FetchError)>,
    pub admitted: Vec<Alert>,
    pub suppressed: usize,
    /// Notifications accepted by at least one sink.
    pub delivered: usize,
    /// Stopped early because shutdown was requested.
    pub cancelled: bool,
}

/// The alerting pipeline shared by every watch job.
pub struct Pipeline {
    adapter: SourceAdapter,
    rules: RuleSet,
    evaluator: RuleEvaluator,
    dedup: Deduplicator,
    dispatcher: Arc<Dispatcher>,
    cool_down: Duration,
}

impl Pipeline {
    pub fn new(
        adapter: SourceAdapter,
        rules: RuleSet,
        dispatcher: Arc<Dispatcher>,
        cool_down: Duration,
    ) -> Self {
        Self {
            adapter,
            rules,
            evaluator: RuleEvaluator::new(),
            dedup: Deduplicator::new(),
            dispatcher,
            cool_down,
        }
    }

    pub fn adapter(&self) -> &SourceAdapter {
        &self.adapter
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The rule's own cool-down, or the global one.
    fn cool_down_for(&self, alert: &Alert) -> Duration {
        self.rules
            .get(&alert.rule_id)
            .and_then(|rule| rule.cooldown())
            .unwrap_or(self.cool_down)
    }

    /// Fetch, evaluate and dedup one subject without publishing anything.
    pub async fn screen_subject(
        &self,
        source_id: &str,
        subject: &str,
        params: &Params,
    ) -> Result<SubjectReport, FetchError> {
        let snapshot = self.adapter.fetch(source_id, subject, params).await?;
        let raised = self.evaluator.evaluate(&snapshot, self.rules.rules());

        let mut report = SubjectReport {
            subject: subject.to_string(),
            ..Default::default()
        };
        for alert in raised {
            if self.dedup.admit(&alert, self.cool_down_for(&alert)) {
                debug!(subject, rule_id = %alert.rule_id, "Alert admitted");
                report.admitted.push(alert);
            } else {
                debug!(subject, rule_id = %alert.rule_id, "Alert suppressed by cool-down");
                report.suppressed += 1;
            }
        }
        Ok(report)
    }

    /// Fetch, evaluate, dedup and publish each admitted alert on its own.
    pub async fn process_subject(
        &self,
        source_id: &str,
        subject: &str,
        params: &Params,
    ) -> Result<SubjectReport, FetchError> {
        let mut report = self.screen_subject(source_id, subject, params).await?;
        for alert in &report.admitted {
            let dispatch = self.dispatcher.publish(&Notification::from_alert(alert)).await;
            self.settle(std::slice::from_ref(alert), &dispatch);
            report.dispatches.push(dispatch);
        }
        Ok(report)
    }

    /// Release the cool-down of alerts that no sink accepted, so the next
    /// firing can try again. Returns whether anything was delivered.
    fn settle(&self, alerts: &[Alert], dispatch: &DispatchReport) -> bool {
        if dispatch.any_delivered() {
            return true;
        }
        if dispatch.failed() > 0 {
            warn!(alerts = alerts.len(), "No sink accepted the notification, releasing cool-down");
            for alert in alerts {
                self.dedup.forget(alert);
            }
        }
        false
    }

    /// Run one watch firing over every subject in order.
    ///
    /// A failed fetch skips its subject and the rest still run. Shutdown is
    /// checked before each subject, so at most the current one finishes.
    pub async fn run_watch(&self, spec: &WatchSpec, ctx: &FiringContext) -> WatchReport {
        let mut report = WatchReport::default();
        let mut digest: Vec<Alert> = Vec::new();

        for subject in &spec.subjects {
            if ctx.is_cancelled() {
                info!(job_id = %spec.job_id, remaining_from = %subject, "Shutdown requested, stopping watch");
                report.cancelled = true;
                break;
            }

            let outcome = if spec.digest {
                self.screen_subject(&spec.source, subject, &spec.params).await
            } else {
                self.process_subject(&spec.source, subject, &spec.params).await
            };

            match outcome {
                Ok(subject_report) => {
                    report.checked += 1;
                    report.suppressed += subject_report.suppressed;
                    report.delivered += subject_report
                        .dispatches
                        .iter()
                        .filter(|d| d.any_delivered())
                        .count();
                    if spec.digest {
                        digest.extend(subject_report.admitted.iter().cloned());
                    }
                    report.admitted.extend(subject_report.admitted);
                }
                Err(e) => {
                    warn!(
                        job_id = %spec.job_id,
                        source = %spec.source,
                        subject = %subject,
                        error = %e,
                        "Fetch failed, skipping subject"
                    );
                    report.failed.push((subject.clone(), e));
                }
            }
        }

        if !digest.is_empty() {
            let notification =
                Notification::digest(&spec.title, &digest).with_metadata("job_id", &spec.job_id);
            let dispatch = self.dispatcher.publish(&notification).await;
            if self.settle(&digest, &dispatch) {
                report.delivered += 1;
            }
        }

        info!(
            job_id = %spec.job_id,
            checked = report.checked,
            failed = report.failed.len(),
            admitted = report.admitted.len(),
            suppressed = report.suppressed,
            delivered = report.delivered,
            "Watch firing finished"
        );
        report
    }
}
