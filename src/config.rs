//! # Configuration
//!
//! Environment-driven configuration for the engine tunables and the server.
//! Every knob has a production default; the environment only overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

fn env_f64(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "Ignoring unparsable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "Ignoring unparsable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "Ignoring unparsable value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Tunables for the scoring pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Propagation coefficient alpha
    pub alpha: f64,
    /// Maximum BFS depth for risk diffusion
    pub max_depth: usize,
    /// Minimum base risk required to trigger propagation
    pub risk_threshold: f64,
    /// Daily decay factor (0.995 = 0.5% per day)
    pub decay_factor: f64,
    /// Risk floor for ever-risky entities
    pub min_risk_floor: f64,
    /// Amount above which the high-amount rule fires
    pub high_amount_threshold: f64,
    /// Minimum member count for a ring
    pub ring_min_size: usize,
    /// Additive boost for ring members
    pub ring_boost: f64,
    /// Minimum member count for a dense subgraph
    pub dense_min_size: usize,
    /// Edge/node ratio above which a component counts as dense
    pub dense_ratio: f64,
    /// Additive boost for dense-subgraph members
    pub dense_boost: f64,
    /// Degree above which a hub qualifies as a star center
    pub star_degree: usize,
    /// Additive boost for star hubs
    pub star_boost: f64,
    /// Average member risk required before a cluster is flagged
    pub cluster_min_avg_risk: f64,
    /// Per-event wall-clock deadline
    pub event_deadline: Duration,
    /// Sub-deadline for cache reads; timeout is treated as a miss
    pub cache_read_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            max_depth: 2,
            risk_threshold: 0.1,
            decay_factor: 0.995,
            min_risk_floor: 0.01,
            high_amount_threshold: 1000.0,
            ring_min_size: 3,
            ring_boost: 0.15,
            dense_min_size: 4,
            dense_ratio: 1.5,
            dense_boost: 0.10,
            star_degree: 10,
            star_boost: 0.10,
            cluster_min_avg_risk: 0.6,
            event_deadline: Duration::from_millis(200),
            cache_read_deadline: Duration::from_millis(20),
        }
    }
}

impl EngineConfig {
    /// Load tunables from the environment on top of the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            alpha: env_f64("RISKMESH_ALPHA", defaults.alpha),
            max_depth: env_usize("RISKMESH_MAX_DEPTH", defaults.max_depth),
            risk_threshold: env_f64("RISKMESH_RISK_THRESHOLD", defaults.risk_threshold),
            decay_factor: env_f64("RISKMESH_DECAY_FACTOR", defaults.decay_factor),
            min_risk_floor: env_f64("RISKMESH_MIN_RISK_FLOOR", defaults.min_risk_floor),
            high_amount_threshold: env_f64(
                "RISKMESH_HIGH_AMOUNT_THRESHOLD",
                defaults.high_amount_threshold,
            ),
            ring_min_size: env_usize("RISKMESH_RING_MIN_SIZE", defaults.ring_min_size),
            ring_boost: env_f64("RISKMESH_RING_BOOST", defaults.ring_boost),
            dense_min_size: env_usize("RISKMESH_DENSE_MIN_SIZE", defaults.dense_min_size),
            dense_ratio: env_f64("RISKMESH_DENSE_RATIO", defaults.dense_ratio),
            dense_boost: env_f64("RISKMESH_DENSE_BOOST", defaults.dense_boost),
            star_degree: env_usize("RISKMESH_STAR_DEGREE", defaults.star_degree),
            star_boost: env_f64("RISKMESH_STAR_BOOST", defaults.star_boost),
            cluster_min_avg_risk: env_f64(
                "RISKMESH_CLUSTER_MIN_AVG_RISK",
                defaults.cluster_min_avg_risk,
            ),
            event_deadline: Duration::from_millis(env_u64("RISKMESH_DEADLINE_MS", 200)),
            cache_read_deadline: Duration::from_millis(env_u64("RISKMESH_CACHE_DEADLINE_MS", 20)),
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen address, e.g. `0.0.0.0:8000`
    pub bind: String,
    /// Postgres connection string for the durable sink; absent disables it
    pub database_url: Option<String>,
    /// Redis connection string for the cache tier; absent keeps memory-only
    pub redis_url: Option<String>,
    /// Engine tunables
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind: std::env::var("RISKMESH_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            engine: EngineConfig::from_env(),
        }
    }
}
