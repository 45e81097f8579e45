//! Two-layer research cache with single-flight fetches.
//!
//! The memory layer is a bounded LRU; the optional persistent layer keeps
//! entries across restarts. Concurrent callers asking for the same key share
//! one in-flight fetch, and a failed fetch is reported to every one of them
//! without caching anything.

pub mod disk;

pub use disk::{CacheStore, DiskStore};

use crate::error::{Error, Result};
use crate::models::Evidence;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Cache of evidence batches keyed by query fingerprint.
pub type EvidenceCache = Cache<Vec<Evidence>>;

/// Sizing and lifetime of cache entries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    /// Entries held in memory before LRU eviction.
    pub capacity: usize,
    /// Lifetime of an entry regardless of LRU pressure.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// A cached value with its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The parts of a persisted entry needed to expire it without knowing `V`.
#[derive(Deserialize)]
struct EntryHeader {
    key: String,
    expires_at: DateTime<Utc>,
}

/// Counters for cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

type Flight<V> = watch::Receiver<Option<Result<V>>>;

enum Role<V> {
    Leader(watch::Sender<Option<Result<V>>>),
    Follower(Flight<V>),
}

/// Deterministic cache key for a research query.
///
/// Case and whitespace differences in the query collapse to the same key;
/// the location bias is part of the key.
pub fn fingerprint(query: &str, location: Option<&str>) -> String {
    let normalized = query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let location = location.map(|l| l.trim().to_lowercase()).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update([0x1f]);
    hasher.update(location.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Bounded, expiring, single-flight cache.
pub struct Cache<V> {
    memory: Mutex<LruCache<String, CacheEntry<V>>>,
    store: Option<Arc<dyn CacheStore>>,
    inflight: std::sync::Mutex<HashMap<String, Flight<V>>>,
    ttl: chrono::Duration,
    counters: Counters,
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Memory-only cache.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Memory cache backed by a persistent store.
    pub fn with_store(config: CacheConfig, store: Arc<dyn CacheStore>) -> Result<Self> {
        Self::build(config, Some(store))
    }

    fn build(config: CacheConfig, store: Option<Arc<dyn CacheStore>>) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.capacity)
            .ok_or_else(|| Error::Config("cache capacity must be at least 1".to_string()))?;
        if config.ttl.is_zero() {
            return Err(Error::Config("cache TTL must be positive".to_string()));
        }
        let ttl = chrono::Duration::from_std(config.ttl)
            .map_err(|e| Error::Config(format!("cache TTL out of range: {}", e)))?;

        Ok(Self {
            memory: Mutex::new(LruCache::new(capacity)),
            store,
            inflight: std::sync::Mutex::new(HashMap::new()),
            ttl,
            counters: Counters::default(),
        })
    }

    /// Return the cached value for `key`, or run `fetch` to produce it.
    ///
    /// The flag is `true` when this caller did not run `fetch` itself: either
    /// the value was cached or it was shared from another caller's fetch.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<(V, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let mut fetch = Some(fetch);

        loop {
            if let Some(value) = self.lookup(key).await {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((value, true));
            }

            match self.join_or_lead(key) {
                Role::Follower(mut rx) => {
                    debug!(key, "awaiting in-flight fetch");
                    let shared = {
                        let waited = rx.wait_for(Option::is_some).await;
                        match waited {
                            Ok(value) => (*value).clone(),
                            Err(_) => None,
                        }
                    };
                    match shared {
                        Some(result) => {
                            self.counters.hits.fetch_add(1, Ordering::Relaxed);
                            return result.map(|v| (v, true));
                        }
                        // The leading caller was dropped before finishing; retry.
                        None => continue,
                    }
                }
                Role::Leader(tx) => {
                    let _guard = InflightGuard {
                        inflight: &self.inflight,
                        key,
                    };

                    // Another leader may have filled the cache since our lookup.
                    if let Some(value) = self.lookup(key).await {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        let _ = tx.send(Some(Ok(value.clone())));
                        return Ok((value, true));
                    }

                    let Some(fetch) = fetch.take() else {
                        return Err(Error::Cache("fetch function already consumed".to_string()));
                    };

                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    self.counters.fetches.fetch_add(1, Ordering::Relaxed);
                    let result = fetch().await;

                    if let Ok(value) = &result {
                        self.insert(key, value.clone()).await;
                    } else {
                        debug!(key, "fetch failed, nothing cached");
                    }

                    let _ = tx.send(Some(result.clone()));
                    return result.map(|v| (v, false));
                }
            }
        }
    }

    /// Look up a live entry without fetching.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.lookup(key).await
    }

    /// Insert a value directly, bypassing single-flight.
    pub async fn insert(&self, key: &str, value: V) {
        let now = Utc::now();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            created_at: now,
            expires_at: now + self.ttl,
        };

        if let Some(store) = &self.store {
            match serde_json::to_string(&entry) {
                Ok(payload) => {
                    if let Err(e) = store.save(key, &payload).await {
                        warn!("Failed to persist cache entry: {}", e);
                    }
                }
                Err(e) => warn!("Failed to serialize cache entry: {}", e),
            }
        }

        self.remember(entry).await;
    }

    /// Drop every entry from both layers.
    pub async fn clear(&self) -> Result<()> {
        self.memory.lock().await.clear();
        if let Some(store) = &self.store {
            store.clear().await?;
        }
        Ok(())
    }

    /// Drop expired entries from both layers. Returns the number of
    /// persisted entries removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        {
            let mut memory = self.memory.lock().await;
            let expired: Vec<String> = memory
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                memory.pop(&key);
            }
        }

        let Some(store) = &self.store else {
            return Ok(0);
        };
        let mut removed = 0;
        for payload in store.payloads().await? {
            match serde_json::from_str::<EntryHeader>(&payload) {
                Ok(header) if now >= header.expires_at => {
                    store.remove(&header.key).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable cache entry: {}", e),
            }
        }
        debug!(removed, "purged expired cache entries");
        Ok(removed)
    }

    /// Entries held in the memory layer.
    pub async fn memory_entries(&self) -> usize {
        self.memory.lock().await.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    async fn remember(&self, entry: CacheEntry<V>) {
        let key = entry.key.clone();
        let mut memory = self.memory.lock().await;
        if let Some((evicted, _)) = memory.push(key.clone(), entry) {
            if evicted != key {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %evicted, "evicted least recently used entry");
            }
        }
    }

    async fn lookup(&self, key: &str) -> Option<V> {
        let now = Utc::now();

        {
            let mut memory = self.memory.lock().await;
            let expired = match memory.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => true,
                None => false,
            };
            if expired {
                memory.pop(key);
            }
        }

        let store = self.store.as_ref()?;
        let payload = match store.load(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read persisted cache entry: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry<V>>(&payload) {
            Ok(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                self.remember(entry).await;
                Some(value)
            }
            Ok(_) => {
                let _ = store.remove(key).await;
                None
            }
            Err(e) => {
                warn!("Discarding unreadable cache entry: {}", e);
                let _ = store.remove(key).await;
                None
            }
        }
    }

    fn join_or_lead(&self, key: &str) -> Role<V> {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(rx) = inflight.get(key) {
            return Role::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        inflight.insert(key.to_string(), rx);
        Role::Leader(tx)
    }
}

/// Clears the in-flight marker when the leading caller finishes or is dropped.
struct InflightGuard<'a, V> {
    inflight: &'a std::sync::Mutex<HashMap<String, Flight<V>>>,
    key: &'a str,
}

impl<V> Drop for InflightGuard<'_, V> {
    fn drop(&mut self) {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inflight.remove(self.key);
    }
}
