//! Uniform fetch entry point in front of every registered source.
//!
//! Order of operations for one `fetch`:
//! 1. Serialize on the request key so a key is never fetched twice concurrently.
//! 2. Serve from the TTL cache when fresh.
//! 3. Acquire the source's rate limiter, once per network attempt.
//! 4. Call the source under a timeout, retrying transient failures.
//! 5. Cache successes only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ecoalert_core::config::RateLimitConfig;
use ecoalert_core::Snapshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::limiter::{RateLimiter, RateLimiterRegistry};
use crate::retry::RetryPolicy;
use crate::traits::{DataSource, FetchError, Params};

/// Deterministic cache key for a request: `source:key` plus sorted params.
pub fn cache_key(source_id: &str, key: &str, params: &Params) -> String {
    let mut out = format!("{source_id}:{key}");
    for (i, (k, v)) in params.iter().enumerate() {
        out.push(if i == 0 { '?' } else { '&' });
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

/// Caching, rate-limited, timeout-guarded front for data sources.
pub struct SourceAdapter {
    sources: HashMap<String, Arc<dyn DataSource>>,
    cache: TtlCache<Arc<Snapshot>>,
    limiters: RateLimiterRegistry,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    fetch_timeout: Duration,
    slow_fetch_threshold: Duration,
    retry: RetryPolicy,
}

impl SourceAdapter {
    pub fn new(ttl: Duration, default_rate_limit: RateLimitConfig) -> Self {
        Self {
            sources: HashMap::new(),
            cache: TtlCache::new(ttl),
            limiters: RateLimiterRegistry::new(default_rate_limit),
            in_flight: Mutex::new(HashMap::new()),
            fetch_timeout: Duration::from_secs(10),
            slow_fetch_threshold: Duration::from_secs(2),
            retry: RetryPolicy::none(),
        }
    }

    /// Register a source under its own id. A later registration with the
    /// same id replaces the earlier one.
    pub fn with_source(mut self, source: Arc<dyn DataSource>) -> Self {
        let id = source.source_id().to_string();
        self.sources.insert(id, source);
        self
    }

    pub fn with_rate_limit(mut self, source_id: impl Into<String>, config: RateLimitConfig) -> Self {
        self.limiters = self.limiters.with_override(source_id, config);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_slow_fetch_threshold(mut self, threshold: Duration) -> Self {
        self.slow_fetch_threshold = threshold;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &TtlCache<Arc<Snapshot>> {
        &self.cache
    }

    pub fn has_source(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }

    pub fn limiter_for(&self, source_id: &str) -> Arc<RateLimiter> {
        self.limiters.limiter_for(source_id)
    }

    /// Fetch `key` from `source_id`, served from cache when fresh.
    ///
    /// Failures are returned to the caller and never cached, so the next
    /// call for the same key goes to the network again.
    pub async fn fetch(
        &self,
        source_id: &str,
        key: &str,
        params: &Params,
    ) -> Result<Arc<Snapshot>, FetchError> {
        let source = self
            .sources
            .get(source_id)
            .ok_or_else(|| FetchError::unknown_source(source_id))?;

        let cache_key = cache_key(source_id, key, params);
        let key_lock = self.key_lock(&cache_key);
        let _guard = key_lock.lock.lock().await;

        if let Some(hit) = self.cache.get(&cache_key) {
            debug!(source = source_id, key, "Cache hit");
            return Ok(hit);
        }

        let limiter = self.limiters.limiter_for(source_id);
        let snapshot = Arc::new(self.fetch_with_retry(source.as_ref(), &limiter, key, params).await?);
        self.cache.put(cache_key, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn key_lock(&self, cache_key: &str) -> KeyLock<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        KeyLock {
            in_flight: &self.in_flight,
            key: cache_key.to_string(),
            lock: Arc::clone(in_flight.entry(cache_key.to_string()).or_default()),
        }
    }

    /// Keys with a fetch in progress or waiting.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn fetch_with_retry(
        &self,
        source: &dyn DataSource,
        limiter: &RateLimiter,
        key: &str,
        params: &Params,
    ) -> Result<Snapshot, FetchError> {
        let source_id = source.source_id();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let permit = limiter.acquire().await;
            if !permit.waited.is_zero() {
                info!(
                    source = source_id,
                    waited_ms = permit.waited.as_millis() as u64,
                    "Rate limiter delayed fetch"
                );
            }

            let started = Instant::now();
            let result = match tokio::time::timeout(self.fetch_timeout, source.fetch(key, params)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::transport(format!(
                    "timed out after {}ms",
                    self.fetch_timeout.as_millis()
                ))),
            };
            let elapsed = started.elapsed();
            if elapsed > self.slow_fetch_threshold {
                warn!(
                    source = source_id,
                    key,
                    duration_ms = elapsed.as_millis() as u64,
                    "Slow fetch"
                );
            }

            match result {
                Ok(snapshot) => {
                    debug!(source = source_id, key, attempt, "Fetched snapshot");
                    return Ok(snapshot);
                }
                Err(e) => match self.retry.next_delay(attempt, &e) {
                    Some(delay) => {
                        warn!(
                            source = source_id,
                            key,
                            attempt,
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "Fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

/// Per-key fetch lock. The map entry is removed by the last holder, so the
/// map only holds keys with a fetch in progress or waiting.
struct KeyLock<'a> {
    in_flight: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map plus ours: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            in_flight.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail_first: usize,
    }

    #[async_trait::async_trait]
    impl DataSource for CountingSource {
        async fn fetch(&self, key: &str, _params: &Params) -> Result<Snapshot, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if n < self.fail_first {
                return Err(FetchError::bad_status(503, "unavailable"));
            }
            Ok(Snapshot::new(key, "mock").with_field("temp", 20.0))
        }

        fn source_id(&self) -> &str {
            "mock"
        }
    }

    fn adapter(calls: &Arc<AtomicUsize>, delay: Duration, fail_first: usize) -> SourceAdapter {
        SourceAdapter::new(Duration::from_secs(300), RateLimitConfig::default()).with_source(Arc::new(
            CountingSource {
                calls: Arc::clone(calls),
                delay,
                fail_first,
            },
        ))
    }

    #[test]
    fn cache_key_sorts_params() {
        let mut params = Params::new();
        params.insert("units".into(), "metric".into());
        params.insert("lang".into(), "es".into());
        assert_eq!(
            cache_key("openweather", "Lima", &params),
            "openweather:Lima?lang=es&units=metric"
        );
        assert_eq!(cache_key("openweather", "Lima", &Params::new()), "openweather:Lima");
    }

    #[tokio::test(start_paused = true)]
    async fn second_fetch_within_ttl_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(&calls, Duration::ZERO, 0);

        let a = adapter.fetch("mock", "Lima", &Params::new()).await.unwrap();
        let b = adapter.fetch("mock", "Lima", &Params::new()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_of_same_key_share_one_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(adapter(&calls, Duration::from_millis(200), 0));

        let params = Params::new();
        let (a, b) = tokio::join!(
            adapter.fetch("mock", "Bogota", &params),
            adapter.fetch("mock", "Bogota", &params),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn key_locks_are_released_after_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(&calls, Duration::ZERO, 1);
        let params = Params::new();

        assert!(adapter.fetch("mock", "Lima", &params).await.is_err());
        adapter.fetch("mock", "Quito", &params).await.unwrap();
        adapter.fetch("mock", "Quito", &params).await.unwrap();
        assert_eq!(adapter.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(&calls, Duration::ZERO, 1);

        let err = adapter.fetch("mock", "Lima", &Params::new()).await.unwrap_err();
        assert_eq!(err.status, Some(503));
        assert!(adapter.cache().is_empty());

        adapter.fetch("mock", "Lima", &Params::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(&calls, Duration::ZERO, 2).with_retry(RetryPolicy::new(
            3,
            Duration::from_millis(100),
            Duration::from_secs(1),
        ));

        adapter.fetch("mock", "Lima", &Params::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Every attempt consumed a limiter slot.
        assert_eq!(adapter.limiter_for("mock").in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out_as_transport_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(&calls, Duration::from_secs(30), 0)
            .with_fetch_timeout(Duration::from_secs(5));

        let err = adapter.fetch("mock", "Lima", &Params::new()).await.unwrap_err();
        assert_eq!(err.kind, crate::FetchErrorKind::Transport);
        assert!(adapter.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_source_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(&calls, Duration::ZERO, 0);

        let err = adapter.fetch("nope", "Lima", &Params::new()).await.unwrap_err();
        assert_eq!(err.kind, crate::FetchErrorKind::UnknownSource);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(&calls, Duration::ZERO, 0);

        adapter.fetch("mock", "Lima", &Params::new()).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        adapter.fetch("mock", "Lima", &Params::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
