//! Counter storage backends
//!
//! Provides storage implementations for rate limit counters:
//! - Redis for distributed, multi-process deployments
//! - In-memory for development and single-instance deployments

use super::types::current_time_secs;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Trait for shared increment-and-check counters.
///
/// The backend is treated as a black box with one operation: bump the
/// counter at `key`, keep it alive for `ttl_secs`, and report the new count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key`, refreshing its TTL, and return the
    /// post-increment count
    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<u64, String>;

    /// Cleanup expired entries (for in-memory storage)
    async fn cleanup(&self);
}

/// Redis counter backend
pub struct RedisCounterStore {
    connection_manager: Arc<ConnectionManager>,
}

impl RedisCounterStore {
    /// Connect the counter backend, verifying the server responds before
    /// any counter traffic depends on it
    pub async fn new(url: &str) -> Result<Self, String> {
        let client = redis::Client::open(url)
            .map_err(|e| format!("Redis client setup for rate limit counters failed: {}", e))?;

        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| format!("Redis connection for rate limit counters failed: {}", e))?;

        let mut conn = connection_manager.clone();
        if let Err(e) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            warn!("Redis did not answer PING for rate limit counters: {}", e);
            return Err(format!("Redis ping failed: {}", e));
        }

        debug!("Rate limit counters connected to Redis");

        Ok(Self {
            connection_manager: Arc::new(connection_manager),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<u64, String> {
        let mut conn = (*self.connection_manager).clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| format!("Redis INCR error: {}", e))?;

        Ok(count)
    }

    async fn cleanup(&self) {
        // Redis handles TTL-based cleanup automatically
    }
}

/// In-memory counter entry with expiration
#[derive(Clone)]
struct MemoryEntry {
    count: u64,
    expires_at: u64,
}

/// In-memory counter backend for development/single instance
pub struct InMemoryCounterStore {
    counters: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl InMemoryCounterStore {
    /// Create a new in-memory counter backend
    pub fn new() -> Self {
        Self {
            counters: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<u64, String> {
        let now = current_time_secs();
        let mut counters = self.counters.write().await;

        let entry = counters
            .entry(key.to_string())
            .and_modify(|e| {
                if e.expires_at <= now {
                    e.count = 0;
                }
                e.count += 1;
                e.expires_at = now + ttl_secs;
            })
            .or_insert(MemoryEntry {
                count: 1,
                expires_at: now + ttl_secs,
            });

        Ok(entry.count)
    }

    async fn cleanup(&self) {
        let now = current_time_secs();
        let mut counters = self.counters.write().await;
        counters.retain(|_, entry| entry.expires_at > now);
        debug!("Completed rate limit counter cleanup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_counts_up_per_key() {
        let storage = InMemoryCounterStore::new();

        assert_eq!(storage.incr("a", 60).await.unwrap(), 1);
        assert_eq!(storage.incr("a", 60).await.unwrap(), 2);
        assert_eq!(storage.incr("b", 60).await.unwrap(), 1);
        assert_eq!(storage.incr("a", 60).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cleanup_drops_expired_entries() {
        let storage = InMemoryCounterStore::new();
        storage.incr("stale", 0).await.unwrap();
        storage.incr("fresh", 60).await.unwrap();

        storage.cleanup().await;

        let counters = storage.counters.read().await;
        assert!(!counters.contains_key("stale"));
        assert!(counters.contains_key("fresh"));
    }

    #[tokio::test]
    async fn expired_entry_restarts_from_one() {
        let storage = InMemoryCounterStore::new();
        storage.incr("k", 0).await.unwrap();
        // The entry's TTL already elapsed, so the next increment starts over.
        assert_eq!(storage.incr("k", 60).await.unwrap(), 1);
    }
}
