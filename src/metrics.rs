//! # Prometheus Metrics
//!
//! Process-wide metrics for the scoring pipeline.
//!
//! ## Metrics Exposed
//!
//! ### Counters
//! - `riskmesh_requests_total` - Events accepted for scoring
//! - `riskmesh_errors_total` - Scoring failures (by kind)
//! - `riskmesh_rate_limited_total` - Requests rejected by the rate limiter
//! - `riskmesh_cache_hits_total` / `riskmesh_cache_misses_total`
//! - `riskmesh_sink_retries_total` - Durable-sink write retries
//! - `riskmesh_sink_dead_letter_total` - Rows dropped after retries / full queue
//!
//! ### Histograms
//! - `riskmesh_request_latency_ms` - End-to-end event latency
//! - `riskmesh_propagation_latency_ms` - BFS diffusion latency
//!
//! ### Gauges
//! - `riskmesh_graph_nodes` / `riskmesh_graph_edges` - Live graph size
//! - `riskmesh_event_rate` - Events per second (updated by the engine)

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

lazy_static! {
    // ========================================================================
    // Counters
    // ========================================================================

    /// Events accepted for scoring
    pub static ref REQUESTS_TOTAL: Counter = register_counter!(
        "riskmesh_requests_total",
        "Total transaction events processed"
    )
    .unwrap();

    /// Scoring failures by kind
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "riskmesh_errors_total",
        "Total errors while processing events",
        &["kind"]  // validation, internal
    )
    .unwrap();

    /// Requests rejected at the admission gate
    pub static ref RATE_LIMITED_TOTAL: Counter = register_counter!(
        "riskmesh_rate_limited_total",
        "Total requests rejected by the rate limiter"
    )
    .unwrap();

    /// Cache hits on the propagation keyspace
    pub static ref CACHE_HITS_TOTAL: Counter = register_counter!(
        "riskmesh_cache_hits_total",
        "Total cache hits"
    )
    .unwrap();

    /// Cache misses (including timed-out reads)
    pub static ref CACHE_MISSES_TOTAL: Counter = register_counter!(
        "riskmesh_cache_misses_total",
        "Total cache misses"
    )
    .unwrap();

    /// Durable-sink write retries
    pub static ref SINK_RETRIES_TOTAL: Counter = register_counter!(
        "riskmesh_sink_retries_total",
        "Total durable sink write retries"
    )
    .unwrap();

    /// Rows dropped to dead letter
    pub static ref SINK_DEAD_LETTER_TOTAL: Counter = register_counter!(
        "riskmesh_sink_dead_letter_total",
        "Total transaction rows dropped after exhausting retries or on a full queue"
    )
    .unwrap();

    // ========================================================================
    // Histograms
    // ========================================================================

    /// End-to-end request latency in milliseconds
    pub static ref REQUEST_LATENCY_MS: Histogram = register_histogram!(
        "riskmesh_request_latency_ms",
        "End-to-end event scoring latency in milliseconds",
        vec![1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 500.0]
    )
    .unwrap();

    /// Propagation latency in milliseconds
    pub static ref PROPAGATION_LATENCY_MS: Histogram = register_histogram!(
        "riskmesh_propagation_latency_ms",
        "Risk propagation latency in milliseconds",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0]
    )
    .unwrap();

    // ========================================================================
    // Gauges
    // ========================================================================

    /// Live node count
    pub static ref GRAPH_NODES: Gauge = register_gauge!(
        "riskmesh_graph_nodes",
        "Total nodes in the entity graph"
    )
    .unwrap();

    /// Live edge count
    pub static ref GRAPH_EDGES: Gauge = register_gauge!(
        "riskmesh_graph_edges",
        "Total edges in the entity graph"
    )
    .unwrap();

    /// Events processed per second
    pub static ref EVENT_RATE: Gauge = register_gauge!(
        "riskmesh_event_rate",
        "Events processed per second"
    )
    .unwrap();
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
