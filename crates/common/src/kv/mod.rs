//! Durable key-value store abstraction
//!
//! Provides:
//! - The `KvStore` trait backing the discovery cache tier-2 and the task table
//! - A Redis-backed production implementation
//! - An in-memory implementation for tests and single-node deployments

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Minimal durable KV contract required by the discovery core.
///
/// Secondary indexes (task status, external-id uniqueness) are built by the
/// callers out of additional keys; `scan_prefix` is the only scan primitive.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, optionally expiring after `ttl`
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All live entries whose key starts with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

impl dyn KvStore {
    /// Typed read
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Typed write
    pub async fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, bytes, ttl).await
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory KV store with TTL support. Used by tests and as a fallback when
/// no durable backend is configured.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = MemoryEntry {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut hits: Vec<(String, Vec<u8>)> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(hits)
    }
}

// ============================================================================
// Redis implementation
// ============================================================================

/// Redis KV configuration
#[derive(Debug, Clone)]
pub struct RedisKvConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for RedisKvConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "paperscout".to_string(),
        }
    }
}

/// Redis-backed durable KV store
pub struct RedisKv {
    connection: RwLock<MultiplexedConnection>,
    config: RedisKvConfig,
}

impl RedisKv {
    /// Connect to Redis
    pub async fn connect(config: RedisKvConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| AppError::PersistenceFault {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client.get_multiplexed_async_connection().await.map_err(|e| {
            AppError::PersistenceFault {
                message: format!("Failed to connect to Redis: {}", e),
            }
        })?;

        Ok(Self {
            connection: RwLock::new(connection),
            config,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    fn strip_prefix<'a>(&self, full_key: &'a str) -> &'a str {
        full_key
            .strip_prefix(&self.config.key_prefix)
            .and_then(|k| k.strip_prefix(':'))
            .unwrap_or(full_key)
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;
        let value: Option<Vec<u8>> = conn.get(&full_key).await?;
        debug!(key = %full_key, hit = value.is_some(), "KV get");
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;
        match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(&full_key, value, ttl.as_secs()).await?;
            }
            None => {
                conn.set::<_, _, ()>(&full_key, value).await?;
            }
        }
        debug!(key = %full_key, "KV put");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;
        let deleted: i32 = conn.del(&full_key).await?;
        Ok(deleted > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let pattern = format!("{}*", self.key(prefix));
        let mut conn = self.connection.write().await;

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        keys.sort();

        let mut out = Vec::with_capacity(keys.len());
        for full_key in keys {
            let value: Option<Vec<u8>> = conn.get(&full_key).await?;
            if let Some(value) = value {
                out.push((self.strip_prefix(&full_key).to_string(), value));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let kv = MemoryKv::new();
        kv.put("a", b"1".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert!(kv.delete("a").await.unwrap());
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert!(!kv.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let kv = MemoryKv::new();
        kv.put("a", b"1".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_scan_prefix() {
        let kv = MemoryKv::new();
        kv.put("task:1", b"a".to_vec(), None).await.unwrap();
        kv.put("task:2", b"b".to_vec(), None).await.unwrap();
        kv.put("other:1", b"c".to_vec(), None).await.unwrap();

        let hits = kv.scan_prefix("task:").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "task:1");
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        kv.put_json("k", &vec![1u32, 2, 3], None).await.unwrap();
        let back: Option<Vec<u32>> = kv.get_json("k").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
    }
}
