//! # RiskMesh
//!
//! Online fraud-scoring engine. Ingested transaction events are scored in
//! [0,1] against a dynamically maintained entity-relationship graph: base
//! heuristics, bounded-depth risk propagation, ring/cluster/star detection,
//! and lazy time decay, with caching, rate limiting, and metrics around the
//! hot path.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod graph;
pub mod metrics;
pub mod risk;
pub mod sink;
pub mod types;

// Re-export the main building blocks
pub use auth::{ApiKeyManager, AuthGate, Principal, RateLimiter};
pub use cache::{CacheConfig, CacheKeys, CacheStats, CacheTtl, RiskCache};
pub use config::{AppConfig, EngineConfig};
pub use graph::{
    ClusteringDetector, Direction, Graph, GraphSnapshot, GraphStore, Propagator, TimeDecay,
};
pub use risk::{Explainer, RiskEngine, RiskEngineBuilder, RuleSet};
pub use sink::{FraudAnalytics, SinkConfig, TransactionRecord, TransactionSink};
pub use types::{
    EntityId, EntityKind, EventRequest, Recommendation, RiskMeshError, RiskMeshResult,
    RiskResponse, TransactionId,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
