//! # API Keys & Rate Limiting
//!
//! Resolves the `x-api-key` header to a principal and gates admission with a
//! per-principal token bucket: capacity = requests per window, refilled
//! continuously at capacity/window per second, no queuing. Unknown keys are
//! rejected when the deny-unknown policy is on.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{RiskMeshError, RiskMeshResult};

/// A resolved caller identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub requests_per_window: u32,
}

/// Static key registry
#[derive(Debug, Clone)]
pub struct ApiKeyManager {
    keys: HashMap<String, Principal>,
    deny_unknown: bool,
    /// Capacity granted to unknown keys when deny-unknown is off
    default_limit: u32,
}

impl ApiKeyManager {
    pub fn new(keys: HashMap<String, Principal>, deny_unknown: bool, default_limit: u32) -> Self {
        Self { keys, deny_unknown, default_limit }
    }

    /// Demo registry, overridable via `RISKMESH_API_KEYS`
    /// (`key:name:limit` triples, comma separated) and
    /// `RISKMESH_DENY_UNKNOWN`.
    pub fn from_env() -> Self {
        let mut keys = HashMap::new();
        match std::env::var("RISKMESH_API_KEYS") {
            Ok(raw) => {
                for spec in raw.split(',').filter(|s| !s.trim().is_empty()) {
                    let parts: Vec<&str> = spec.trim().splitn(3, ':').collect();
                    match parts.as_slice() {
                        [key, name, limit] => match limit.parse::<u32>() {
                            Ok(limit) => {
                                keys.insert(
                                    key.to_string(),
                                    Principal { name: name.to_string(), requests_per_window: limit },
                                );
                            }
                            Err(_) => warn!(spec, "Ignoring API key with unparsable limit"),
                        },
                        _ => warn!(spec, "Ignoring malformed API key spec"),
                    }
                }
            }
            Err(_) => {
                keys.insert(
                    "riskmesh-key-demo-001".to_string(),
                    Principal { name: "demo".to_string(), requests_per_window: 100 },
                );
                keys.insert(
                    "riskmesh-key-demo-002".to_string(),
                    Principal { name: "test".to_string(), requests_per_window: 50 },
                );
            }
        }

        let deny_unknown = std::env::var("RISKMESH_DENY_UNKNOWN")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(true);

        Self::new(keys, deny_unknown, 50)
    }

    /// Resolve an API key to a principal.
    pub fn resolve(&self, api_key: &str) -> RiskMeshResult<Principal> {
        if let Some(principal) = self.keys.get(api_key) {
            return Ok(principal.clone());
        }
        if self.deny_unknown {
            Err(RiskMeshError::UnknownPrincipal)
        } else {
            Ok(Principal {
                name: format!("anon:{}", api_key),
                requests_per_window: self.default_limit,
            })
        }
    }
}

/// Token bucket state for one principal
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / window.as_secs_f64(),
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn retry_after(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }

    fn is_stale(&self, max_age: Duration) -> bool {
        Instant::now().duration_since(self.last_refill) > max_age
    }
}

/// Per-principal token-bucket limiter
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    window: Duration,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self { buckets: DashMap::new(), window, enabled: true }
    }

    /// Limiter that admits everything (for tests)
    pub fn disabled() -> Self {
        Self { buckets: DashMap::new(), window: Duration::from_secs(60), enabled: false }
    }

    /// Try to admit one request for `principal`.
    pub fn check(&self, principal: &Principal) -> RiskMeshResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let mut bucket = self
            .buckets
            .entry(principal.name.clone())
            .or_insert_with(|| TokenBucket::new(principal.requests_per_window, self.window));

        if bucket.try_consume() {
            debug!(principal = %principal.name, "Rate check passed");
            Ok(())
        } else {
            let retry_after = bucket.retry_after();
            warn!(
                principal = %principal.name,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            Err(RiskMeshError::RateLimited {
                principal: principal.name.clone(),
                retry_after_secs: retry_after.as_secs().max(1),
            })
        }
    }

    /// Remaining whole tokens for a principal.
    pub fn remaining(&self, principal: &Principal) -> u32 {
        match self.buckets.get(&principal.name) {
            Some(bucket) => bucket.tokens as u32,
            None => principal.requests_per_window,
        }
    }

    /// Drop buckets with no recent activity.
    pub fn cleanup_stale(&self, max_age: Duration) {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_stale(max_age));
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!(removed, "Cleaned up stale rate limit buckets");
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats { enabled: self.enabled, active_buckets: self.buckets.len() }
    }
}

/// Rate limiter statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub active_buckets: usize,
}

/// Key resolution and admission in one step
pub struct AuthGate {
    keys: ApiKeyManager,
    limiter: RateLimiter,
}

impl AuthGate {
    pub fn new(keys: ApiKeyManager, limiter: RateLimiter) -> Self {
        Self { keys, limiter }
    }

    pub fn from_env() -> Self {
        Self::new(ApiKeyManager::from_env(), RateLimiter::new(Duration::from_secs(60)))
    }

    /// Resolve the key and consume one token. Errors map to 401 / 429.
    pub fn authorize(&self, api_key: &str) -> RiskMeshResult<Principal> {
        let principal = self.keys.resolve(api_key)?;
        self.limiter.check(&principal)?;
        Ok(principal)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
