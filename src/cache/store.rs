// src/cache/store.rs

// In-memory TTL cache for results of remote calls.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::cache::CacheStats;
use crate::cache_op;
use crate::config::CacheConfig;
use crate::error::Result;

// Expiry used when `now + ttl` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Entry in the cache. Replaced wholesale on every write.
#[derive(Debug)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn expiry(now: Instant, ttl: Duration) -> Instant {
        now.checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheInner {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove expired entries, returning how many were dropped
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }
}

/// Aborts the background cleanup task when the last store handle goes away
#[derive(Debug)]
struct CleanupTask(JoinHandle<()>);

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Key/value store with per-entry expiry.
///
/// Values are kept as serialized JSON so one store can hold results of
/// different types. Concurrent writers to the same key race and the last
/// write wins; there is no per-key coordination.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<CacheInner>,
    config: CacheConfig,
    _cleanup_task: Option<Arc<CleanupTask>>,
}

impl CacheStore {
    /// Creates a new cache store with the given configuration.
    ///
    /// The background cleanup task is only started when called inside a
    /// tokio runtime.
    pub fn new(config: CacheConfig) -> Self {
        let inner = Arc::new(CacheInner {
            entries: RwLock::new(HashMap::with_capacity(config.max_entries.min(10_000))),
            ..CacheInner::default()
        });

        let cleanup_task = if config.use_background_task {
            match Handle::try_current() {
                Ok(handle) => {
                    let weak = Arc::downgrade(&inner);
                    let task = handle.spawn(Self::cleanup_loop(weak, config.cleanup_interval));
                    Some(Arc::new(CleanupTask(task)))
                }
                Err(_) => {
                    warn!("No tokio runtime available, cache cleanup task not started");
                    None
                }
            }
        } else {
            None
        };

        Self {
            inner,
            config,
            _cleanup_task: cleanup_task,
        }
    }

    async fn cleanup_loop(inner: Weak<CacheInner>, every: Duration) {
        let mut interval = time::interval(every);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let purged = inner.purge_expired();
            if purged > 0 {
                trace!(purged, "Purged expired cache entries");
            }
        }

        debug!("Cache cleanup task stopped");
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the cached value for `key` if fresh, otherwise run `fetch`,
    /// store its result for `ttl` and return it.
    ///
    /// A failed fetch stores nothing and its error is returned. A fetched value
    /// that cannot be encoded is returned uncached.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Duration>,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get::<T>(key) {
            return Ok(value);
        }

        let value = fetch().await?;
        if let Err(e) = self.insert(key, &value, ttl) {
            warn!(key = %key, error = %e, "Failed to cache fetched value");
        }
        Ok(value)
    }

    /// Look up a fresh value, recording a hit or a miss.
    ///
    /// A value that does not deserialize as `T` counts as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = {
            let entries = self.inner.read();
            entries
                .get(key)
                .filter(|entry| entry.is_fresh(Instant::now()))
                .map(|entry| entry.value.clone())
        };

        let value = bytes.and_then(|bytes| match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value has unexpected shape, refetching");
                None
            }
        });

        match value {
            Some(value) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                cache_op!("get", key, true);
                Some(value)
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                cache_op!("get", key, false);
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry
    pub fn insert<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: impl Into<Duration>,
    ) -> Result<()> {
        let value = serde_json::to_vec(value)?;
        let expires_at = CacheEntry::expiry(Instant::now(), ttl.into());

        let mut entries = self.inner.write();

        if entries.len() >= self.config.max_entries && !entries.contains_key(key) {
            let now = Instant::now();
            entries.retain(|_, entry| entry.is_fresh(now));

            if entries.len() >= self.config.max_entries {
                // Evict whatever would expire soonest
                let victim = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    debug!(key = %victim, "Cache full, evicting entry");
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    /// Drop the entry for `key`. Returns whether one was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.inner.write().remove(key).is_some();
        if removed {
            self.inner.invalidations.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache entry invalidated");
        }
        removed
    }

    /// Drop every entry. Hit and miss counters are kept.
    pub fn clear_all(&self) {
        info!("Clearing all caches...");
        let cleared = {
            let mut entries = self.inner.write();
            let n = entries.len();
            entries.clear();
            n
        };
        self.inner.invalidations.fetch_add(1, Ordering::Relaxed);
        info!(cleared, "All caches cleared");
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            invalidations: self.inner.invalidations.load(Ordering::Relaxed),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        self.stats().hit_rate()
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a key from the configured prefix and serializable parts, e.g.
    /// `cache.cache_key(&("player", 123))` gives `fpl:["player",123]`.
    ///
    /// Parts must serialize deterministically (tuples, structs, vectors).
    pub fn cache_key<P: Serialize + ?Sized>(&self, parts: &P) -> Result<String> {
        let encoded = serde_json::to_string(parts)?;
        Ok(format!("{}:{}", self.config.key_prefix, encoded))
    }
}
