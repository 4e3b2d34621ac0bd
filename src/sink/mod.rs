//! # Durable Sink
//!
//! Append-only transaction persistence and the read-only analytics that run
//! over it. The scoring hot path never blocks on the database: rows go
//! through a bounded queue drained by a worker pool, and overflow is dropped
//! to a dead-letter counter.

pub mod analytics;
pub mod writer;

pub use analytics::FraudAnalytics;
pub use writer::{SinkConfig, TransactionRecord, TransactionSink};
