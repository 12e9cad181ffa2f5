//! Sliding-window rate limiting, one limiter per upstream source.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ecoalert_core::config::RateLimitConfig;
use tokio::time::Instant;
use tracing::debug;

/// Proof that a call slot was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    /// How long `acquire` blocked before granting the slot.
    pub waited: Duration,
}

/// Admits at most `limit` calls in any trailing window of `period`.
///
/// Waiters are not queued fairly: when several tasks sleep on a full
/// window, whichever wakes first after a slot frees up takes it.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    period: Duration,
    calls: tokio::sync::Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// A `limit` of zero is treated as one.
    pub fn new(limit: u32, period: Duration) -> Self {
        let limit = (limit as usize).max(1);
        Self {
            limit,
            period,
            calls: tokio::sync::Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.calls, config.period())
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait until a call slot is free, record it, and return.
    ///
    /// Never fails. The window lock is released while sleeping.
    pub async fn acquire(&self) -> Permit {
        let requested = Instant::now();
        loop {
            let wait_for = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                prune(&mut calls, now, self.period);
                if calls.len() < self.limit {
                    calls.push_back(now);
                    return Permit {
                        waited: now.duration_since(requested),
                    };
                }
                match calls.front() {
                    Some(&oldest) => self.period.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };
            debug!(
                wait_ms = wait_for.as_millis() as u64,
                limit = self.limit,
                "Rate limit reached, waiting for a free slot"
            );
            tokio::time::sleep(wait_for).await;
        }
    }

    /// Calls recorded inside the current window.
    pub async fn in_window(&self) -> usize {
        let mut calls = self.calls.lock().await;
        prune(&mut calls, Instant::now(), self.period);
        calls.len()
    }
}

fn prune(calls: &mut VecDeque<Instant>, now: Instant, period: Duration) {
    while let Some(&oldest) = calls.front() {
        if now.duration_since(oldest) >= period {
            calls.pop_front();
        } else {
            break;
        }
    }
}

/// Hands out one shared [`RateLimiter`] per source id, created on first use.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    default: RateLimitConfig,
    overrides: HashMap<String, RateLimitConfig>,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(default: RateLimitConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Use `config` instead of the default for `source_id`.
    pub fn with_override(mut self, source_id: impl Into<String>, config: RateLimitConfig) -> Self {
        self.overrides.insert(source_id.into(), config);
        self
    }

    pub fn limiter_for(&self, source_id: &str) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(limiter) = limiters.get(source_id) {
            return Arc::clone(limiter);
        }
        let config = self.overrides.get(source_id).unwrap_or(&self.default);
        let limiter = Arc::new(RateLimiter::from_config(config));
        limiters.insert(source_id.to_string(), Arc::clone(&limiter));
        limiter
    }
}
