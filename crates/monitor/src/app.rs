//! Builds a ready-to-start monitor from configuration.
//!
//! Everything that can be wrong with the configuration surfaces here, before
//! the scheduler starts: unresolvable secrets, bad sinks, invalid cron
//! expressions. A job that fails to build is never registered.

use std::sync::Arc;

use ecoalert_core::config::{resolve_env_vars, JobConfig, JobKind, SinkKind, SourceKind};
use ecoalert_core::{ConfigError, MonitorConfig};
use ecoalert_notify::{Dispatcher, LogSink, Sink, WebhookSink};
use ecoalert_rules::RuleSet;
use ecoalert_scheduler::{Job, Recurrence, Scheduler};
use ecoalert_source::{OpenWeatherSource, RetryPolicy, SourceAdapter};
use tracing::info;

use crate::error::MonitorError;
use crate::jobs::{Broadcast, MonitorJob};
use crate::pipeline::{Pipeline, WatchSpec};

/// A configured monitor: the shared pipeline plus a scheduler holding every
/// enabled job.
pub struct Monitor {
    pub pipeline: Arc<Pipeline>,
    pub scheduler: Scheduler<MonitorJob>,
}

impl Monitor {
    /// Load the rule set named by `config.rules_file` and build.
    pub fn from_config(config: &MonitorConfig) -> Result<Self, MonitorError> {
        let rules = RuleSet::from_file(&config.rules_file)?;
        Self::with_rules(config, rules)
    }

    pub fn with_rules(config: &MonitorConfig, rules: RuleSet) -> Result<Self, MonitorError> {
        let adapter = build_adapter(config)?;
        let dispatcher = Arc::new(build_dispatcher(config)?);
        let pipeline = Arc::new(Pipeline::new(
            adapter,
            rules,
            Arc::clone(&dispatcher),
            config.cool_down(),
        ));

        let offset = config.utc_offset()?;
        let mut scheduler = Scheduler::new();
        for job in &config.jobs {
            if !job.enabled {
                info!(job_id = %job.id, "Job disabled, not scheduling");
                continue;
            }
            let recurrence = Recurrence::parse(&job.id, job.interval()?, job.cron.as_deref(), offset)?;
            let body = build_job(job, &pipeline, &dispatcher);
            scheduler.register(Job::new(job.id.clone(), recurrence, body))?;
        }

        Ok(Self {
            pipeline,
            scheduler,
        })
    }
}

fn build_job(job: &JobConfig, pipeline: &Arc<Pipeline>, dispatcher: &Arc<Dispatcher>) -> MonitorJob {
    match job.kind {
        JobKind::Watch => MonitorJob::Watch {
            pipeline: Arc::clone(pipeline),
            spec: WatchSpec::from_config(job),
        },
        JobKind::Broadcast => MonitorJob::Broadcast(Broadcast::new(
            &job.id,
            job.title(),
            job.messages.clone(),
            Arc::clone(dispatcher),
        )),
    }
}

fn build_adapter(config: &MonitorConfig) -> Result<SourceAdapter, ConfigError> {
    let mut adapter = SourceAdapter::new(config.ttl(), config.default_rate_limit)
        .with_fetch_timeout(config.fetch_timeout())
        .with_slow_fetch_threshold(config.slow_fetch_threshold())
        .with_retry(RetryPolicy::from_config(&config.retry));

    for (id, source) in &config.sources {
        match source.kind {
            SourceKind::OpenWeather => {
                let raw_key = source.api_key.as_deref().ok_or_else(|| {
                    ConfigError::Invalid(format!("source '{id}' needs an `api_key`"))
                })?;
                let api_key = resolve_env_vars(raw_key)?;
                adapter = adapter.with_source(Arc::new(OpenWeatherSource::new(
                    id.as_str(),
                    api_key,
                    source.base_url.clone(),
                )));
            }
        }
        adapter = adapter.with_rate_limit(id.as_str(), config.rate_limit_for(id));
    }
    Ok(adapter)
}

fn build_dispatcher(config: &MonitorConfig) -> Result<Dispatcher, MonitorError> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::with_capacity(config.sinks.len());
    for sink in &config.sinks {
        match sink.kind {
            SinkKind::Log => sinks.push(Box::new(LogSink::new(sink.id.as_str()))),
            SinkKind::Webhook => {
                let url = sink.url.as_deref().ok_or_else(|| {
                    ConfigError::Invalid(format!("webhook sink '{}' needs a `url`", sink.id))
                })?;
                let webhook = WebhookSink::from_config(
                    sink.id.as_str(),
                    url,
                    sink.method.as_deref(),
                    sink.headers.clone(),
                )?
                .with_timeout(sink.timeout())?;
                sinks.push(Box::new(webhook));
            }
        }
    }
    Ok(Dispatcher::new(sinks)?)
}
