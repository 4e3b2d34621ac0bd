//! # Clustering Detector
//!
//! Topological fraud-pattern detection over the induced subgraph around an
//! event: rings (strongly connected components of the influence graph),
//! dense subgraphs, and star patterns. Detection is read-only; the engine
//! applies the returned boosts under its write lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::types::{ClusterMembers, ClusteringInfo, EntityId, StarPattern};

use super::store::{Direction, Graph};

/// Findings for one event's neighborhood
#[derive(Debug, Clone, Default)]
pub struct ClusterReport {
    /// Member lists for the response payload
    pub info: ClusteringInfo,
    /// Per-node boost; only the maximum applicable boost is kept per node
    pub boosts: BTreeMap<EntityId, f64>,
    /// Every node that is a member of a detected ring
    pub ring_members: BTreeSet<EntityId>,
}

impl ClusterReport {
    pub fn boost_for(&self, id: &EntityId) -> f64 {
        self.boosts.get(id).copied().unwrap_or(0.0)
    }

    fn record_boost(&mut self, id: &EntityId, boost: f64) {
        let entry = self.boosts.entry(id.clone()).or_insert(0.0);
        if boost > *entry {
            *entry = boost;
        }
    }
}

/// Ring / dense-subgraph / star detection
#[derive(Debug, Clone)]
pub struct ClusteringDetector {
    ring_min_size: usize,
    ring_boost: f64,
    dense_min_size: usize,
    dense_ratio: f64,
    dense_boost: f64,
    star_degree: usize,
    star_boost: f64,
    min_avg_risk: f64,
    neighborhood_depth: usize,
}

impl ClusteringDetector {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            ring_min_size: config.ring_min_size,
            ring_boost: config.ring_boost,
            dense_min_size: config.dense_min_size,
            dense_ratio: config.dense_ratio,
            dense_boost: config.dense_boost,
            star_degree: config.star_degree,
            star_boost: config.star_boost,
            min_avg_risk: config.cluster_min_avg_risk,
            neighborhood_depth: 2,
        }
    }

    /// Run all detectors over the union of 2-hop neighborhoods of `seeds`.
    pub fn detect(&self, graph: &Graph, seeds: &[EntityId]) -> ClusterReport {
        let induced = graph.neighborhood(seeds, self.neighborhood_depth);
        if induced.is_empty() {
            return ClusterReport::default();
        }

        let mut report = ClusterReport::default();
        let components = self.influence_components(graph, &induced);

        self.detect_rings(graph, &components, &mut report);
        self.detect_dense_subgraphs(graph, &components, &mut report);
        self.detect_star_patterns(graph, &induced, &mut report);

        report
    }

    /// Strongly connected components of the influence graph over `induced`.
    /// Every observed relation couples both endpoints (reverse traversal is a
    /// first-class direction), so a shared device or IP stitches its users
    /// into one component.
    fn influence_components(
        &self,
        graph: &Graph,
        induced: &BTreeSet<EntityId>,
    ) -> Vec<Vec<EntityId>> {
        let mut pg: DiGraph<EntityId, ()> = DiGraph::new();
        let mut indexes: HashMap<EntityId, NodeIndex> = HashMap::new();
        for id in induced {
            indexes.insert(id.clone(), pg.add_node(id.clone()));
        }
        for (src, dst, _) in graph.edges_within(induced) {
            let (a, b) = (indexes[src], indexes[dst]);
            pg.add_edge(a, b, ());
            pg.add_edge(b, a, ());
        }

        tarjan_scc(&pg)
            .into_iter()
            .map(|component| {
                let mut members: Vec<EntityId> =
                    component.into_iter().map(|ix| pg[ix].clone()).collect();
                members.sort();
                members
            })
            .collect()
    }

    fn average_risk(graph: &Graph, members: &[EntityId]) -> f64 {
        if members.is_empty() {
            return 0.0;
        }
        let total: f64 = members.iter().map(|id| graph.risk(id)).sum();
        total / members.len() as f64
    }

    fn detect_rings(
        &self,
        graph: &Graph,
        components: &[Vec<EntityId>],
        report: &mut ClusterReport,
    ) {
        for members in components {
            if members.len() < self.ring_min_size {
                continue;
            }
            let avg_risk = Self::average_risk(graph, members);
            if avg_risk < self.min_avg_risk {
                continue;
            }
            warn!(size = members.len(), avg_risk, "Fraud ring detected");
            for id in members {
                report.record_boost(id, self.ring_boost);
                report.ring_members.insert(id.clone());
            }
            report.info.rings.push(ClusterMembers {
                members: members.iter().map(|id| id.to_string()).collect(),
                size: members.len(),
                avg_risk,
            });
        }
    }

    fn detect_dense_subgraphs(
        &self,
        graph: &Graph,
        components: &[Vec<EntityId>],
        report: &mut ClusterReport,
    ) {
        for members in components {
            if members.len() < self.dense_min_size {
                continue;
            }
            let set: BTreeSet<EntityId> = members.iter().cloned().collect();
            let edge_count = graph.edges_within(&set).count();
            let ratio = edge_count as f64 / members.len() as f64;
            if ratio < self.dense_ratio {
                continue;
            }
            let avg_risk = Self::average_risk(graph, members);
            if avg_risk < self.min_avg_risk {
                continue;
            }
            debug!(size = members.len(), ratio, avg_risk, "Dense subgraph detected");
            for id in members {
                report.record_boost(id, self.dense_boost);
            }
            report.info.dense_subgraphs.push(ClusterMembers {
                members: members.iter().map(|id| id.to_string()).collect(),
                size: members.len(),
                avg_risk,
            });
        }
    }

    fn detect_star_patterns(
        &self,
        graph: &Graph,
        induced: &BTreeSet<EntityId>,
        report: &mut ClusterReport,
    ) {
        for hub in induced {
            let spokes: BTreeSet<EntityId> = graph
                .neighbors(hub, Direction::Both)
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            if spokes.len() <= self.star_degree {
                continue;
            }
            let hub_risk = graph.risk(hub);
            if hub_risk < self.min_avg_risk {
                continue;
            }
            // Spokes must be otherwise unconnected to each other.
            if graph.edges_within(&spokes).next().is_some() {
                continue;
            }
            warn!(hub = %hub, spokes = spokes.len(), "Star pattern detected");
            report.record_boost(hub, self.star_boost);
            report.info.star_patterns.push(StarPattern {
                hub: hub.to_string(),
                spokes: spokes.len(),
                hub_risk,
            });
        }
    }
}

impl Default for ClusteringDetector {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
