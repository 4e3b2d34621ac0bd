//! # REST API
//!
//! HTTP surface of the engine: event ingest, graph stats, analytics reads,
//! cache stats, health, and metrics exposition.

pub mod health;
pub mod metrics;
pub mod routes;

pub use health::health_routes;
pub use metrics::metrics_routes;
pub use routes::{api_routes, ApiState};
