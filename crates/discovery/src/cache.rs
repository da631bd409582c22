//! Two-tier discovery result cache
//!
//! Tier-1 is a bounded in-memory LRU behind a short critical section
//! (never held across await). Tier-2 is the durable KV, written through on
//! every store and consulted on tier-1 misses. Any tier-2 fault degrades
//! the cache to tier-1-only operation.

use chrono::Utc;
use lru::LruCache;
use paperscout_common::kv::KvStore;
use paperscout_common::metrics::record_cache;
use paperscout_common::models::{CachedDiscoveryResult, DiscoveryConfiguration, UnifiedDiscoveryResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cache counters exposed through operational reads
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

/// Two-tier cache keyed by (paper fingerprint, configuration fingerprint)
pub struct DiscoveryCache {
    memory: Mutex<LruCache<String, CachedDiscoveryResult>>,
    durable: Option<Arc<dyn KvStore>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl DiscoveryCache {
    pub fn new(capacity: usize, ttl: Duration, durable: Option<Arc<dyn KvStore>>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is non-zero");
        Self {
            memory: Mutex::new(LruCache::new(capacity)),
            durable,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Cache key: hash of the paper id and the full configuration
    /// fingerprint, so equivalent configurations share an entry.
    pub fn cache_key(paper_id: Uuid, config: &DiscoveryConfiguration) -> String {
        let mut hasher = Sha256::new();
        hasher.update(paper_id.as_bytes());
        hasher.update(config.fingerprint().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn durable_key(key: &str) -> String {
        format!("discovery_cache:{}", key)
    }

    /// Look up a cached result. Hits bump `hit_count` and LRU recency;
    /// expired entries are evicted and reported as misses.
    pub async fn get(&self, key: &str) -> Option<CachedDiscoveryResult> {
        let now = Utc::now();

        // Tier-1, inside a short critical section
        {
            let mut memory = self.memory.lock().expect("cache lock poisoned");
            if let Some(entry) = memory.get_mut(key) {
                if entry.is_expired(now) {
                    memory.pop(key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                } else {
                    entry.hit_count += 1;
                    let entry = entry.clone();
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    record_cache(true, "memory");
                    return Some(entry);
                }
            }
        }

        // Tier-2 fallback
        if let Some(kv) = &self.durable {
            match kv.get_json::<CachedDiscoveryResult>(&Self::durable_key(key)).await {
                Ok(Some(mut entry)) if !entry.is_expired(now) => {
                    entry.hit_count += 1;
                    self.insert_memory(key, entry.clone());
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    record_cache(true, "durable");
                    return Some(entry);
                }
                Ok(Some(_expired)) => {
                    let _ = kv.delete(&Self::durable_key(key)).await;
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "tier-2 cache read failed, degrading to memory only");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        record_cache(false, "");
        None
    }

    /// Write through to both tiers. A tier-2 write failure is logged, not
    /// propagated.
    pub async fn put(&self, key: &str, result: UnifiedDiscoveryResult) {
        let entry = CachedDiscoveryResult::new(result, self.ttl);
        self.insert_memory(key, entry.clone());

        if let Some(kv) = &self.durable {
            if let Err(err) = kv
                .put_json(&Self::durable_key(key), &entry, Some(self.ttl))
                .await
            {
                warn!(error = %err, "tier-2 cache write failed");
            }
        }
        debug!(key, "cached discovery result");
    }

    /// Remove an entry from both tiers
    pub async fn invalidate(&self, key: &str) {
        self.memory
            .lock()
            .expect("cache lock poisoned")
            .pop(key);
        if let Some(kv) = &self.durable {
            if let Err(err) = kv.delete(&Self::durable_key(key)).await {
                warn!(error = %err, "tier-2 cache invalidate failed");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.memory.lock().expect("cache lock poisoned").len(),
        }
    }

    fn insert_memory(&self, key: &str, entry: CachedDiscoveryResult) {
        let mut memory = self.memory.lock().expect("cache lock poisoned");
        if memory.push(key.to_string(), entry).is_some_and(|(k, _)| k != key) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}
