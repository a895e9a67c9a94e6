//! Query Result Cache Module
//!
//! Provides:
//! - A pluggable string key/value backend with per-entry TTL ([`CacheBackend`])
//! - An in-process backend with LRU eviction ([`MemoryCacheBackend`])
//! - Typed get-or-compute over any backend ([`ExecutionCache`])
//!
//! ## Design
//!
//! Values are stored as JSON text so that a shared backend (Redis) can serve
//! several server processes. Within one process, concurrent misses on the same
//! key are collapsed: the first caller computes while the others wait on a
//! per-key async mutex and then re-read the backend.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::ExecutionError;

/// Cache backend failure
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CacheError(pub String);

/// String key/value store with expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
}

/// Cache entry
#[derive(Clone)]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,

    /// When the entry was created
    pub created_at: Instant,

    /// When the entry was last accessed
    pub last_accessed: Instant,

    /// Time-to-live (None = no expiration)
    pub ttl: Option<Duration>,
}

impl<T> CacheEntry<T> {
    /// Create a new cache entry
    pub fn new(value: T, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        CacheEntry {
            value,
            created_at: now,
            last_accessed: now,
            ttl,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.created_at.elapsed() >= ttl)
    }

    /// Mark the entry as accessed
    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: usize,

    /// Number of cache misses
    pub misses: usize,

    /// Number of entries currently in cache
    pub size: usize,

    /// Number of entries evicted
    pub evictions: usize,

    /// Number of entries expired
    pub expirations: usize,
}

impl CacheStats {
    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, CacheEntry<String>>,
    stats: CacheStats,
}

/// In-process backend. Thread-safe LRU with TTL.
pub struct MemoryCacheBackend {
    inner: Mutex<MemoryInner>,
    max_entries: usize,
}

impl MemoryCacheBackend {
    pub fn new(max_entries: usize) -> Self {
        MemoryCacheBackend {
            inner: Mutex::new(MemoryInner::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make room for one insert: expired entries first, otherwise the LRU one.
    fn evict(inner: &mut MemoryInner) {
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(k, _)| k.clone())
            .collect();

        if !expired.is_empty() {
            for key in expired {
                inner.entries.remove(&key);
                inner.stats.expirations += 1;
            }
            return;
        }

        if let Some(key) = inner
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(k, _)| k.clone())
        {
            inner.entries.remove(&key);
            inner.stats.evictions += 1;
        }
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        MemoryCacheBackend::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.touch();
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Ok(Some(value));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(key);
            inner.stats.expirations += 1;
        }
        inner.stats.misses += 1;
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_entries {
            Self::evict(&mut inner);
        }
        inner
            .entries
            .insert(key.to_string(), CacheEntry::new(value, Some(ttl)));
        Ok(())
    }
}

/// A claim on the key's single-flight lock. The map entry is removed when the
/// last claim drops.
struct InflightSlot<'a> {
    map: &'a DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InflightSlot<'a> {
    fn claim(map: &'a DashMap<String, Arc<tokio::sync::Mutex<()>>>, key: &'a str) -> Self {
        let lock = Arc::clone(
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .value(),
        );
        InflightSlot { map, key, lock }
    }

    async fn acquire(&self) -> tokio::sync::OwnedMutexGuard<()> {
        Arc::clone(&self.lock).lock_owned().await
    }
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        // Held by the map and by this claim only
        self.map.remove_if(self.key, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

/// Typed get-or-compute over a [`CacheBackend`].
pub struct ExecutionCache {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ExecutionCache {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        ExecutionCache {
            backend,
            default_ttl,
            inflight: DashMap::new(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Keys with a computation currently in progress or waited on
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Read and decode. An entry that no longer decodes is treated as a miss.
    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ExecutionError> {
        let Some(payload) = self.backend.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(cache_key = key, error = %e, "cache_entry_undecodable");
                Ok(None)
            }
        }
    }

    /// Return the cached value for `key`, or run `compute`, store its result
    /// for `ttl` and return it. The flag is `true` when served from cache.
    ///
    /// A zero `ttl` uses the configured default. Failed writes are logged and
    /// do not fail the request; computation errors are never cached.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<(T, bool), ExecutionError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        if let Some(value) = self.read(key).await? {
            debug!(cache_key = key, "cache_hit");
            return Ok((value, true));
        }

        let slot = InflightSlot::claim(&self.inflight, key);
        let _guard = slot.acquire().await;

        // Another caller may have filled it while we waited
        if let Some(value) = self.read(key).await? {
            debug!(cache_key = key, "cache_hit_after_wait");
            return Ok((value, true));
        }

        debug!(cache_key = key, "cache_miss");
        let value = compute().await?;

        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        match serde_json::to_string(&value) {
            Ok(payload) => {
                if let Err(e) = self.backend.set(key, payload, ttl).await {
                    warn!(cache_key = key, error = %e, "cache_write_failed");
                }
            }
            Err(e) => warn!(cache_key = key, error = %e, "cache_encode_failed"),
        }

        Ok((value, false))
    }
}
