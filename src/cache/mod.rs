//! # Risk Cache
//!
//! Keyed, TTL'd memoization for scored results and hot entities. The
//! in-memory tier (DashMap) is always available; a Redis tier can be layered
//! in front with the `redis-cache` feature. Redis failures degrade to the
//! memory tier with a warning, never to an error on the scoring path.
//!
//! Keyspaces and TTLs:
//! - `user_risk:{id}`: 30 min
//! - `entity:{kind}:{id}`: 60 min
//! - `propagation:{principal}:{fingerprint}`: 15 min

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::EntityKind;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries held in the memory tier
    pub max_memory_items: usize,
    /// Redis URL (only used with the `redis-cache` feature)
    pub redis_url: Option<String>,
    /// Master switch
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_memory_items: 100_000, redis_url: None, enabled: true }
    }
}

/// Cache entry with absolute expiry
#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self { value, expires_at: Instant::now() + ttl }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// TTL'd blob cache with hit-rate accounting
pub struct RiskCache {
    config: CacheConfig,
    memory: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    #[cfg(feature = "redis-cache")]
    redis: Option<redis::aio::ConnectionManager>,
}

impl RiskCache {
    /// Memory-only cache
    pub fn new_memory(config: CacheConfig) -> Self {
        Self {
            config,
            memory: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            #[cfg(feature = "redis-cache")]
            redis: None,
        }
    }

    /// Cache with a Redis tier in front of the memory tier
    #[cfg(feature = "redis-cache")]
    pub async fn new_with_redis(config: CacheConfig) -> Result<Self, crate::types::RiskMeshError> {
        use crate::types::RiskMeshError;

        let redis = if let Some(ref url) = config.redis_url {
            let client = redis::Client::open(url.as_str())
                .map_err(|e| RiskMeshError::Cache(e.to_string()))?;
            let manager = redis::aio::ConnectionManager::new(client)
                .await
                .map_err(|e| RiskMeshError::Cache(e.to_string()))?;
            debug!(url = %url, "Connected to Redis");
            Some(manager)
        } else {
            None
        };

        Ok(Self {
            config,
            memory: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            redis,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get a value; expired entries count as misses and are evicted.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.config.enabled {
            return None;
        }

        #[cfg(feature = "redis-cache")]
        if let Some(ref redis) = self.redis {
            match self.get_from_redis(redis, key).await {
                Ok(Some(value)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "Cache hit (redis)");
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "Redis get failed, falling back to memory"),
            }
        }

        if let Some(entry) = self.memory.get(key) {
            if !entry.is_expired() {
                if let Ok(value) = serde_json::from_str(&entry.value) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "Cache hit (memory)");
                    return Some(value);
                }
            } else {
                drop(entry);
                self.memory.remove(key);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Cache miss");
        None
    }

    /// Set a value with a TTL. Serialization failures are logged and dropped.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if !self.config.enabled {
            return;
        }

        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize cache value");
                return;
            }
        };

        #[cfg(feature = "redis-cache")]
        if let Some(ref redis) = self.redis {
            if let Err(e) = self.set_in_redis(redis, key, &serialized, ttl).await {
                warn!(key, error = %e, "Redis set failed");
            }
        }

        if self.memory.len() < self.config.max_memory_items {
            self.memory.insert(key.to_string(), CacheEntry::new(serialized, ttl));
        }
    }

    /// Drop a key from every tier.
    pub async fn invalidate(&self, key: &str) {
        #[cfg(feature = "redis-cache")]
        if let Some(ref redis) = self.redis {
            let _ = self.delete_from_redis(redis, key).await;
        }
        self.memory.remove(key);
        debug!(key, "Cache invalidated");
    }

    /// Keys, approximate memory footprint, and lifetime hit rate.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let memory_bytes: usize = self
            .memory
            .iter()
            .map(|entry| entry.key().len() + entry.value().value.len())
            .sum();
        CacheStats {
            keys: self.memory.len(),
            memory_bytes,
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
            enabled: self.config.enabled,
        }
    }

    /// Evict expired entries from the memory tier.
    pub fn cleanup_expired(&self) {
        let before = self.memory.len();
        self.memory.retain(|_, entry| !entry.is_expired());
        let removed = before - self.memory.len();
        if removed > 0 {
            debug!(removed, "Evicted expired cache entries");
        }
    }

    #[cfg(feature = "redis-cache")]
    async fn get_from_redis<T: DeserializeOwned>(
        &self,
        redis: &redis::aio::ConnectionManager,
        key: &str,
    ) -> Result<Option<T>, redis::RedisError> {
        use redis::AsyncCommands;

        let mut conn = redis.clone();
        let value: Option<String> = conn.get(key).await?;
        match value {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    #[cfg(feature = "redis-cache")]
    async fn set_in_redis(
        &self,
        redis: &redis::aio::ConnectionManager,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), redis::RedisError> {
        use redis::AsyncCommands;

        let mut conn = redis.clone();
        conn.set_ex(key, value, ttl.as_secs()).await
    }

    #[cfg(feature = "redis-cache")]
    async fn delete_from_redis(
        &self,
        redis: &redis::aio::ConnectionManager,
        key: &str,
    ) -> Result<(), redis::RedisError> {
        use redis::AsyncCommands;

        let mut conn = redis.clone();
        conn.del(key).await
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub keys: usize,
    pub memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub enabled: bool,
}

// ============================================================================
// Keyspaces
// ============================================================================

/// Key builders for the three keyspaces
pub struct CacheKeys;

impl CacheKeys {
    pub fn user_risk(user_id: &str) -> String {
        format!("user_risk:{}", user_id)
    }

    pub fn entity(kind: EntityKind, id: &str) -> String {
        format!("entity:{}:{}", kind, id)
    }

    pub fn propagation(principal: &str, fingerprint: &str) -> String {
        format!("propagation:{}:{}", principal, fingerprint)
    }
}

/// TTLs per keyspace
pub struct CacheTtl;

impl CacheTtl {
    /// User risk scores: 30 minutes
    pub const USER_RISK: Duration = Duration::from_secs(30 * 60);
    /// Entity records: 60 minutes
    pub const ENTITY: Duration = Duration::from_secs(60 * 60);
    /// Scored results by fingerprint: 15 minutes
    pub const PROPAGATION: Duration = Duration::from_secs(15 * 60);
}

/// Background eviction of expired entries.
pub async fn cache_cleanup_task(cache: Arc<RiskCache>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        cache.cleanup_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get_roundtrip() {
        let cache = RiskCache::new_memory(CacheConfig::default());
        cache.set("user_risk:u1", &0.42_f64, Duration::from_secs(60)).await;
        let value: Option<f64> = cache.get("user_risk:u1").await;
        assert_eq!(value, Some(0.42));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = RiskCache::new_memory(CacheConfig::default());
        cache.set("k", &"v", Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let value: Option<String> = cache.get("k").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_key() {
        let cache = RiskCache::new_memory(CacheConfig::default());
        cache.set("k", &1_u32, Duration::from_secs(60)).await;
        cache.invalidate("k").await;
        assert!(cache.get::<u32>("k").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_stores_nothing() {
        let cache = RiskCache::new_memory(CacheConfig { enabled: false, ..Default::default() });
        cache.set("k", &1_u32, Duration::from_secs(60)).await;
        assert!(cache.get::<u32>("k").await.is_none());
    }

    #[tokio::test]
    async fn test_stats_track_hit_rate() {
        let cache = RiskCache::new_memory(CacheConfig::default());
        cache.set("k", &1_u32, Duration::from_secs(60)).await;
        let _: Option<u32> = cache.get("k").await;
        let _: Option<u32> = cache.get("absent").await;

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.keys, 1);
        assert!(stats.memory_bytes > 0);
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(CacheKeys::user_risk("u1"), "user_risk:u1");
        assert_eq!(CacheKeys::entity(EntityKind::Device, "d1"), "entity:device:d1");
        assert_eq!(CacheKeys::propagation("demo", "abc"), "propagation:demo:abc");
    }
}
