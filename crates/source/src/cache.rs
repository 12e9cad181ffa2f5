//! Freshness-windowed cache for fetch results.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Maps a request key to the last value stored for it, for `ttl`.
///
/// Entries are evicted lazily: a lookup that finds a stale entry removes it.
/// There is no size bound; the key space is bounded by configuration
/// (subjects x sources). Callers that must not fetch the same key twice
/// serialize on the key themselves; see [`crate::SourceAdapter`].
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the value for `key` if it was stored less than `ttl` ago.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries();
        let fresh = match entries.get(key) {
            None => return None,
            Some(entry) => entry.stored_at.elapsed() < self.ttl,
        };
        if fresh {
            entries.get(key).map(|e| e.value.clone())
        } else {
            entries.remove(key);
            None
        }
    }

    /// Store `value` under `key`, replacing any previous entry and resetting its age.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries().insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Drop every stale entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        before - entries.len()
    }

    /// Number of stored entries, including stale ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
