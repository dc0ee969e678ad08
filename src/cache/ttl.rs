//! In-memory TTL cache for provider responses
//!
//! Entries expire individually. Expired entries are never returned; they are
//! dropped when next looked up, on every hundredth insert, or by an explicit
//! purge.
//!
//! There is no single-flight: two tasks that miss on the same key at the same
//! time both run their loader, and the later insert wins.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const SWEEP_EVERY_N_SETS: u64 = 100;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Live entries, including expired ones not yet evicted
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL had passed
    pub expirations: u64,
}

impl CacheStats {
    /// Fraction of lookups served from cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Key/value cache with per-entry expiry
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    sets: AtomicU64,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        }
    }
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unexpired value for `key`
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a value; `None` or a zero TTL never expires
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = ttl.filter(|ttl| !ttl.is_zero()).map(|ttl| now + ttl);

        let mut entries = self.lock();
        entries.insert(key.into(), Entry { value, expires_at });

        if self.sets.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY_N_SETS == SWEEP_EVERY_N_SETS - 1 {
            let removed = Self::remove_expired(&mut entries, now);
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        }
    }

    /// Cached value for `key`, or the result of `load` which is then cached
    ///
    /// Errors from `load` are returned and never cached.
    pub async fn fetch<F, Fut, E>(&self, key: &str, ttl: Option<Duration>, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            debug!(key = key, "Cache hit");
            return Ok(value);
        }

        debug!(key = key, "Cache miss");
        let value = load().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Remove keys containing `pattern`, or every key when `pattern` is `None`
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let mut entries = self.lock();
        match pattern {
            Some(pattern) => {
                let before = entries.len();
                entries.retain(|key, _| !key.contains(pattern));
                before - entries.len()
            }
            None => {
                let removed = entries.len();
                entries.clear();
                removed
            }
        }
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let removed = Self::remove_expired(&mut entries, Instant::now());
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn remove_expired(entries: &mut HashMap<String, Entry<V>>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
