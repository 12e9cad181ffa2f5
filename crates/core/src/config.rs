use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_opt(key).and_then(|v| v.parse().ok())
}

/// Resolve `${VAR_NAME}` patterns in a string using `std::env::var`.
///
/// Returns an error if a referenced variable is not set.
pub fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(ConfigError::Invalid(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = env::var(&var_name).map_err(|_| ConfigError::MissingEnv(var_name))?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

// ── Top-level config ──────────────────────────────────────────

/// Full configuration for the monitoring pipeline.
///
/// Parsed once at startup from `ecoalert.toml` with environment variable
/// overrides, then treated as immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Cache freshness window in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,

    /// Minimum seconds between two admitted alerts for the same (subject, rule).
    #[serde(default = "default_cool_down")]
    pub cool_down_seconds: u64,

    /// Upper bound on a single network fetch attempt.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,

    /// Fetches slower than this are logged as warnings.
    #[serde(default = "default_slow_fetch")]
    pub slow_fetch_warn_ms: u64,

    /// Offset used to evaluate cron recurrences, e.g. `"-05:00"`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,

    /// Path to the YAML rule set.
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,

    /// Limit applied to sources without their own `rate_limit`.
    #[serde(default)]
    pub default_rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Named upstream data sources.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,

    #[serde(default)]
    pub jobs: Vec<JobConfig>,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

fn default_ttl() -> u64 {
    300
}

fn default_cool_down() -> u64 {
    3600
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_slow_fetch() -> u64 {
    2000
}

fn default_utc_offset() -> String {
    "+00:00".into()
}

fn default_rules_file() -> PathBuf {
    PathBuf::from("config/rules.yml")
}

// ── Section configs ─────────────────────────────────────────────────

/// Sliding-window call budget for one upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub calls: u32,
    pub period_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls: 10,
            period_seconds: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_seconds)
    }
}

/// Capped exponential backoff for failed fetches.
///
/// `max_attempts` counts the first try, so the default of 1 never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Supported upstream source implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    OpenWeather,
}

/// One upstream data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// May contain `${VAR}` references, resolved at startup.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// What a job does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Poll subjects, evaluate rules, dispatch deduplicated alerts.
    Watch,
    /// Publish the next message from a fixed list.
    Broadcast,
}

/// A scheduled job. Exactly one of `every` or `cron` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    pub kind: JobKind,
    /// Heading for broadcast and digest notifications. Defaults to the id.
    #[serde(default)]
    pub title: Option<String>,
    /// Fixed interval, e.g. `"3h"`.
    #[serde(default)]
    pub every: Option<String>,
    /// 5-field cron expression evaluated at `utc_offset`, e.g. `"0 9 * * *"`.
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    /// Subjects polled in this order on every firing.
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Extra parameters forwarded to the source on every fetch.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Broadcast messages, published in rotation.
    #[serde(default)]
    pub messages: Vec<String>,
    /// Join a firing's alerts into a single notification.
    #[serde(default)]
    pub digest: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl JobConfig {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    /// The fixed interval, if this is an interval job.
    pub fn interval(&self) -> Result<Option<Duration>, ConfigError> {
        match &self.every {
            None => Ok(None),
            Some(s) => match parse_duration(s) {
                Some(d) if !d.is_zero() => Ok(Some(d)),
                _ => Err(ConfigError::Invalid(format!(
                    "job '{}' has invalid interval '{s}'",
                    self.id
                ))),
            },
        }
    }
}

/// Supported notification sink implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Writes notifications to the tracing log.
    Log,
    /// POSTs notifications as JSON.
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub id: String,
    pub kind: SinkKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Whole-request deadline for webhook delivery.
    #[serde(default = "default_sink_timeout")]
    pub timeout_seconds: u64,
}

fn default_sink_timeout() -> u64 {
    10
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// ── Loading & Validation ────────────────────────────────────────────

impl MonitorConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `ECOALERT_KEY` overrides the top-level `key`.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u64("ECOALERT_TTL_SECONDS") {
            self.ttl_seconds = v;
        }
        if let Some(v) = env_u64("ECOALERT_COOL_DOWN_SECONDS") {
            self.cool_down_seconds = v;
        }
        if let Some(v) = env_u64("ECOALERT_FETCH_TIMEOUT_SECONDS") {
            self.fetch_timeout_seconds = v;
        }
        if let Some(v) = env_opt("ECOALERT_UTC_OFFSET") {
            self.utc_offset = v;
        }
        if let Some(v) = env_opt("ECOALERT_RULES_FILE") {
            self.rules_file = PathBuf::from(v);
        }
    }

    /// Validate cross-references and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_seconds must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        self.utc_offset()?;
        validate_rate_limit("default_rate_limit", &self.default_rate_limit)?;
        for (name, source) in &self.sources {
            if let Some(limit) = &source.rate_limit {
                validate_rate_limit(name, limit)?;
            }
        }
        self.validate_jobs()?;
        self.validate_sinks()?;
        Ok(())
    }

    fn validate_jobs(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate job id '{}'", job.id)));
            }
            match (&job.every, &job.cron) {
                (Some(_), None) => {
                    job.interval()?;
                }
                (None, Some(_)) => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "job '{}' must set exactly one of `every` or `cron`",
                        job.id
                    )))
                }
            }
            match job.kind {
                JobKind::Watch => {
                    let source = job.source.as_deref().ok_or_else(|| {
                        ConfigError::Invalid(format!("watch job '{}' needs a `source`", job.id))
                    })?;
                    if !self.sources.contains_key(source) {
                        return Err(ConfigError::Invalid(format!(
                            "job '{}' references unknown source '{source}'",
                            job.id
                        )));
                    }
                    if job.subjects.is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "watch job '{}' has no subjects",
                            job.id
                        )));
                    }
                }
                JobKind::Broadcast => {
                    if job.messages.is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "broadcast job '{}' has no messages",
                            job.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_sinks(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for sink in &self.sinks {
            if !seen.insert(sink.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate sink id '{}'", sink.id)));
            }
            if sink.kind == SinkKind::Webhook && sink.url.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "webhook sink '{}' needs a `url`",
                    sink.id
                )));
            }
            if sink.timeout_seconds == 0 {
                return Err(ConfigError::Invalid(format!(
                    "sink '{}' timeout_seconds must be > 0",
                    sink.id
                )));
            }
        }
        Ok(())
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn slow_fetch_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_fetch_warn_ms)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset
            .parse::<FixedOffset>()
            .map_err(|e| ConfigError::Invalid(format!("invalid utc_offset '{}': {e}", self.utc_offset)))
    }

    /// The rate limit that applies to `source_id`.
    pub fn rate_limit_for(&self, source_id: &str) -> RateLimitConfig {
        self.sources
            .get(source_id)
            .and_then(|s| s.rate_limit)
            .unwrap_or(self.default_rate_limit)
    }

    /// Print a summary for startup logs. Never logs secrets.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  cache:      ttl={}s", self.ttl_seconds);
        tracing::info!("  dedup:      cool_down={}s", self.cool_down_seconds);
        tracing::info!(
            "  fetch:      timeout={}s, max_attempts={}",
            self.fetch_timeout_seconds,
            self.retry.max_attempts
        );
        tracing::info!("  schedule:   utc_offset={}", self.utc_offset);
        tracing::info!("  rules:      {}", self.rules_file.display());
        for (name, source) in &self.sources {
            let limit = self.rate_limit_for(name);
            tracing::info!(
                "  source:     {name} ({:?}) limit={}/{}s",
                source.kind,
                limit.calls,
                limit.period_seconds
            );
        }
        tracing::info!("  jobs:       {}", self.jobs.len());
        tracing::info!("  sinks:      {}", self.sinks.len());
    }
}

fn validate_rate_limit(name: &str, limit: &RateLimitConfig) -> Result<(), ConfigError> {
    if limit.calls == 0 || limit.period_seconds == 0 {
        return Err(ConfigError::Invalid(format!(
            "rate limit for '{name}' needs calls > 0 and period_seconds > 0"
        )));
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
