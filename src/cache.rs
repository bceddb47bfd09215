//! TTL caching for validation and hierarchy lookups
//!
//! Process-wide caches shared across concurrently handled requests.
//! Concurrent writes to the same key are idempotent (the recomputed value
//! is the same), so the map's own synchronization is the only locking.
//! The cache is an explicit abstraction injected into the validator and
//! resolver so a distributed implementation can replace it without
//! touching business logic.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default entry lifetime: one hour.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Snapshot of cache activity.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent TTL cache keyed by string.
pub struct TtlCache<V> {
    entries: DashMap<String, (V, Instant)>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a live value; expired entries count as misses and are dropped.
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expiry) = entry.value();
            if Instant::now() < *expiry {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value.clone());
            }
        }
        // Expired or absent
        self.entries
            .remove_if(key, |_, (_, expiry)| Instant::now() >= *expiry);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    /// Store a value with an explicit TTL.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(key.into(), (value, Instant::now() + ttl));
    }

    /// Drop one key.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every key starting with the given prefix.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove entries past their expiry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expiry)| now < *expiry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
