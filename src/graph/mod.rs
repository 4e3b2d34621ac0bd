//! # Entity Graph
//!
//! In-memory directed multi-typed graph plus the algorithms that run over it:
//! lazy time decay, bounded-depth risk propagation, and ring/cluster/star
//! detection.

pub mod clustering;
pub mod decay;
pub mod propagation;
pub mod store;

pub use clustering::{ClusterReport, ClusteringDetector};
pub use decay::TimeDecay;
pub use propagation::{PropagationOutcome, Propagator};
pub use store::{Direction, EdgeRecord, Graph, GraphSnapshot, GraphStore, NodeRecord};
