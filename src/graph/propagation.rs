//! # Risk Propagation
//!
//! Bounded-depth, level-synchronous BFS diffusion of risk from an event's
//! source node into its outgoing neighborhood. Each node is updated at most
//! once per propagation; neighbor expansion is ordered by ascending node id
//! so runs are reproducible.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::EngineConfig;
use crate::types::EntityId;

use super::decay::TimeDecay;
use super::store::{Direction, Graph};

/// Result of one propagation run
#[derive(Debug, Clone)]
pub struct PropagationOutcome {
    /// Every node whose risk this run set, with its new risk
    pub updates: BTreeMap<EntityId, f64>,
    /// Deepest BFS level that produced an update
    pub depth_reached: usize,
    /// True when the event deadline cut the traversal short
    pub truncated: bool,
}

impl PropagationOutcome {
    fn source_only(source: &EntityId, risk: f64) -> Self {
        let mut updates = BTreeMap::new();
        updates.insert(source.clone(), risk);
        Self { updates, depth_reached: 0, truncated: false }
    }
}

/// Breadth-first risk diffusion
#[derive(Debug, Clone)]
pub struct Propagator {
    alpha: f64,
    max_depth: usize,
    threshold: f64,
}

impl Propagator {
    pub fn new(alpha: f64, max_depth: usize, threshold: f64) -> Self {
        Self { alpha, max_depth, threshold }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.alpha, config.max_depth, config.risk_threshold)
    }

    /// Spread `base_risk` from `source` through outgoing edges up to
    /// `max_depth`. The source's risk is set to the base risk regardless of
    /// whether propagation runs. Visited nodes are lazily decayed before
    /// receiving their delta. When `deadline` passes mid-traversal the run
    /// stops expanding and the outcome is marked truncated; updates already
    /// applied are kept.
    pub fn propagate(
        &self,
        graph: &mut Graph,
        decay: &TimeDecay,
        source: &EntityId,
        base_risk: f64,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> PropagationOutcome {
        let base_risk = crate::types::clamp_unit(base_risk);
        graph.set_risk(source, base_risk, now);

        if base_risk < self.threshold {
            debug!(source = %source, base_risk, threshold = self.threshold, "Propagation skipped");
            return PropagationOutcome::source_only(source, base_risk);
        }

        let mut outcome = PropagationOutcome::source_only(source, base_risk);
        let mut visited: HashSet<EntityId> = HashSet::new();
        visited.insert(source.clone());
        let mut frontier = vec![source.clone()];

        'levels: for depth in 0..self.max_depth {
            let mut next_frontier = Vec::new();
            for node in &frontier {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        outcome.truncated = true;
                        debug!(source = %source, depth, "Propagation truncated by deadline");
                        break 'levels;
                    }
                }
                let node_risk = graph.risk(node);
                for (neighbor, edge) in graph.neighbors(node, Direction::Out) {
                    if !visited.insert(neighbor.clone()) {
                        continue;
                    }
                    let record = match graph.node(&neighbor) {
                        Some(record) => record,
                        None => continue,
                    };
                    let current = decay.decayed(record.risk_score, record.last_seen, now);
                    let delta = self.alpha * node_risk * edge.weight;
                    let updated = (current + delta).min(1.0);
                    graph.set_risk(&neighbor, updated, now);
                    outcome.updates.insert(neighbor.clone(), updated);
                    next_frontier.push(neighbor);
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            outcome.depth_reached = depth + 1;
            frontier = next_frontier;
        }

        outcome
    }
}

impl Default for Propagator {
    fn default() -> Self {
        Self::new(0.5, 2, 0.1)
    }
}
