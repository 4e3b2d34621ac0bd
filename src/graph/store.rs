//! # Graph Store
//!
//! Flat node/edge tables with per-direction adjacency indexes. Nodes and
//! edges are keyed by id and traversed by lookup, never by pointer, so
//! pruning stays a table operation.
//!
//! Locking discipline: `GraphStore` wraps the whole structure in a single
//! readers-writer lock. The engine holds one write guard across an event's
//! mutation phase; analytics and stats endpoints take read guards. Nothing
//! here ever awaits.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{clamp_unit, EntityId, EntityKind};

/// Traversal direction for neighborhood queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

/// Stored attributes of a graph entity
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub kind: EntityKind,
    pub risk_score: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub interaction_count: u64,
}

/// Stored attributes of a directed relationship
#[derive(Debug, Clone, Copy)]
pub struct EdgeRecord {
    pub weight: f64,
    pub interaction_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Cheap point-in-time statistics
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub nodes: usize,
    pub edges: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
}

/// The mutable graph structure. Obtain one via [`GraphStore::read`] or
/// [`GraphStore::write`].
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<EntityId, NodeRecord>,
    edges: HashMap<(EntityId, EntityId), EdgeRecord>,
    out_edges: HashMap<EntityId, BTreeSet<EntityId>>,
    in_edges: HashMap<EntityId, BTreeSet<EntityId>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node if absent. Does not count as an observation: the
    /// interaction counter of an existing node is left alone.
    fn ensure_node(&mut self, id: &EntityId, now: DateTime<Utc>) {
        if !self.nodes.contains_key(id) {
            self.nodes.insert(
                id.clone(),
                NodeRecord {
                    kind: id.kind,
                    risk_score: 0.0,
                    first_seen: now,
                    last_seen: now,
                    interaction_count: 1,
                },
            );
        }
    }

    /// Observe a node: create it if absent, otherwise refresh `last_seen`
    /// and bump the interaction counter. An existing risk score is never
    /// lowered by a smaller initial value.
    pub fn upsert_node(&mut self, id: &EntityId, initial_risk: f64, now: DateTime<Utc>) {
        let initial_risk = clamp_unit(initial_risk);
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.interaction_count += 1;
                if now > node.last_seen {
                    node.last_seen = now;
                }
                if initial_risk > node.risk_score {
                    node.risk_score = initial_risk;
                }
            }
            None => {
                self.nodes.insert(
                    id.clone(),
                    NodeRecord {
                        kind: id.kind,
                        risk_score: initial_risk,
                        first_seen: now,
                        last_seen: now,
                        interaction_count: 1,
                    },
                );
                debug!(node = %id, risk = initial_risk, "Node created");
            }
        }
    }

    /// Observe a directed relationship. Missing endpoints are created (without
    /// bumping their event counters). Re-observation increments the edge's
    /// interaction count, refreshes `last_seen`, and blends the stored weight
    /// toward the new observation, weighted by how often the edge has been
    /// seen before.
    pub fn upsert_edge(&mut self, src: &EntityId, dst: &EntityId, weight: f64, now: DateTime<Utc>) {
        let weight = clamp_unit(weight);
        self.ensure_node(src, now);
        self.ensure_node(dst, now);

        let key = (src.clone(), dst.clone());
        match self.edges.get_mut(&key) {
            Some(edge) => {
                let prior = edge.interaction_count as f64;
                edge.weight = clamp_unit((edge.weight * prior + weight) / (prior + 1.0));
                edge.interaction_count += 1;
                if now > edge.last_seen {
                    edge.last_seen = now;
                }
            }
            None => {
                self.edges.insert(
                    key,
                    EdgeRecord {
                        weight,
                        interaction_count: 1,
                        first_seen: now,
                        last_seen: now,
                    },
                );
                self.out_edges.entry(src.clone()).or_default().insert(dst.clone());
                self.in_edges.entry(dst.clone()).or_default().insert(src.clone());
                debug!(src = %src, dst = %dst, weight, "Edge created");
            }
        }
    }

    pub fn node(&self, id: &EntityId) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &EntityId) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(id)
    }

    /// Current risk of a node, 0.0 when unknown.
    pub fn risk(&self, id: &EntityId) -> f64 {
        self.nodes.get(id).map(|n| n.risk_score).unwrap_or(0.0)
    }

    pub fn has_edge(&self, src: &EntityId, dst: &EntityId) -> bool {
        self.edges.contains_key(&(src.clone(), dst.clone()))
    }

    pub fn edge(&self, src: &EntityId, dst: &EntityId) -> Option<&EdgeRecord> {
        self.edges.get(&(src.clone(), dst.clone()))
    }

    /// Overwrite a node's risk (clamped) and refresh its `last_seen`.
    /// Returns false when the node is unknown.
    pub fn set_risk(&mut self, id: &EntityId, risk: f64, now: DateTime<Utc>) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.risk_score = clamp_unit(risk);
                if now > node.last_seen {
                    node.last_seen = now;
                }
                true
            }
            None => {
                warn!(node = %id, "set_risk on unknown node");
                false
            }
        }
    }

    /// Neighbors with their edge attributes, ascending by neighbor id.
    /// `Both` merges outgoing then incoming, deduplicating by neighbor.
    pub fn neighbors(&self, id: &EntityId, direction: Direction) -> Vec<(EntityId, EdgeRecord)> {
        let mut seen = BTreeMap::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            if let Some(targets) = self.out_edges.get(id) {
                for dst in targets {
                    if let Some(edge) = self.edges.get(&(id.clone(), dst.clone())) {
                        seen.entry(dst.clone()).or_insert(*edge);
                    }
                }
            }
        }
        if matches!(direction, Direction::In | Direction::Both) {
            if let Some(sources) = self.in_edges.get(id) {
                for src in sources {
                    if let Some(edge) = self.edges.get(&(src.clone(), id.clone())) {
                        seen.entry(src.clone()).or_insert(*edge);
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Nodes reachable within `depth` hops of any seed, following both edge
    /// directions. Seeds themselves are included. This is the induced set the
    /// clustering detector operates on.
    pub fn neighborhood(&self, seeds: &[EntityId], depth: usize) -> BTreeSet<EntityId> {
        let mut visited: BTreeSet<EntityId> = seeds
            .iter()
            .filter(|id| self.nodes.contains_key(id))
            .cloned()
            .collect();
        let mut frontier: VecDeque<(EntityId, usize)> =
            visited.iter().map(|id| (id.clone(), 0)).collect();

        while let Some((id, d)) = frontier.pop_front() {
            if d >= depth {
                continue;
            }
            for (neighbor, _) in self.neighbors(&id, Direction::Both) {
                if visited.insert(neighbor.clone()) {
                    frontier.push_back((neighbor, d + 1));
                }
            }
        }
        visited
    }

    /// Directed edges between members of `set`.
    pub fn edges_within<'a>(
        &'a self,
        set: &'a BTreeSet<EntityId>,
    ) -> impl Iterator<Item = (&'a EntityId, &'a EntityId, &'a EdgeRecord)> + 'a {
        self.edges
            .iter()
            .filter(move |((src, dst), _)| set.contains(src) && set.contains(dst))
            .map(|((src, dst), edge)| (src, dst, edge))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for kind in EntityKind::ALL {
            nodes_by_kind.insert(kind.as_str().to_string(), 0);
        }
        for node in self.nodes.values() {
            *nodes_by_kind.entry(node.kind.as_str().to_string()).or_insert(0) += 1;
        }
        GraphSnapshot {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            nodes_by_kind,
        }
    }

    /// Remove nodes not seen within `horizon`, cascading to incident edges.
    /// Returns the number of nodes removed. Runs off the hot path.
    pub fn prune(&mut self, horizon: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - horizon;
        let stale: Vec<EntityId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.last_seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.nodes.remove(id);
            if let Some(targets) = self.out_edges.remove(id) {
                for dst in targets {
                    self.edges.remove(&(id.clone(), dst.clone()));
                    if let Some(sources) = self.in_edges.get_mut(&dst) {
                        sources.remove(id);
                    }
                }
            }
            if let Some(sources) = self.in_edges.remove(id) {
                for src in sources {
                    self.edges.remove(&(src.clone(), id.clone()));
                    if let Some(targets) = self.out_edges.get_mut(&src) {
                        targets.remove(id);
                    }
                }
            }
        }

        if !stale.is_empty() {
            debug!(removed = stale.len(), "Pruned stale nodes");
        }
        stale.len()
    }
}

/// Thread-safe handle over [`Graph`].
#[derive(Debug, Default)]
pub struct GraphStore {
    inner: RwLock<Graph>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Graph::new()) }
    }

    /// Shared read access for stats and analytics.
    pub fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.inner.read()
    }

    /// Exclusive access for the engine's per-event mutation phase.
    pub fn write(&self) -> RwLockWriteGuard<'_, Graph> {
        self.inner.write()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.inner.read().snapshot()
    }

    /// Garbage-collect nodes older than `horizon`.
    pub fn prune(&self, horizon: Duration) -> usize {
        self.inner.write().prune(horizon, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_upsert_node_creates_and_counts_observations() {
        let mut g = Graph::new();
        let u = EntityId::user("u1");
        let t0 = now();

        g.upsert_node(&u, 0.0, t0);
        g.upsert_node(&u, 0.0, t0 + Duration::seconds(1));
        g.upsert_node(&u, 0.0, t0 + Duration::seconds(2));

        let node = g.node(&u).unwrap();
        assert_eq!(node.interaction_count, 3);
        assert_eq!(node.first_seen, t0);
        assert_eq!(node.last_seen, t0 + Duration::seconds(2));
    }

    #[test]
    fn test_upsert_node_never_lowers_risk() {
        let mut g = Graph::new();
        let u = EntityId::user("u1");
        g.upsert_node(&u, 0.8, now());
        g.upsert_node(&u, 0.0, now());
        assert_eq!(g.risk(&u), 0.8);

        g.upsert_node(&u, 0.9, now());
        assert_eq!(g.risk(&u), 0.9);
    }

    #[test]
    fn test_risk_and_weight_clamped() {
        let mut g = Graph::new();
        let u = EntityId::user("u1");
        let d = EntityId::device("d1");
        g.upsert_node(&u, 3.0, now());
        assert_eq!(g.risk(&u), 1.0);

        g.upsert_edge(&u, &d, 2.5, now());
        assert_eq!(g.edge(&u, &d).unwrap().weight, 1.0);

        g.set_risk(&u, -0.3, now());
        assert_eq!(g.risk(&u), 0.0);
    }

    #[test]
    fn test_upsert_edge_creates_endpoints_without_observation() {
        let mut g = Graph::new();
        let u = EntityId::user("u1");
        let d = EntityId::device("d1");

        g.upsert_edge(&u, &d, 0.8, now());
        assert_eq!(g.node(&u).unwrap().interaction_count, 1);
        assert_eq!(g.node(&d).unwrap().interaction_count, 1);

        // Re-observing the edge does not bump node counters.
        g.upsert_edge(&u, &d, 0.8, now());
        assert_eq!(g.node(&u).unwrap().interaction_count, 1);
        assert_eq!(g.edge(&u, &d).unwrap().interaction_count, 2);
    }

    #[test]
    fn test_edge_weight_blends_by_interaction_count() {
        let mut g = Graph::new();
        let u = EntityId::user("u1");
        let d = EntityId::device("d1");

        g.upsert_edge(&u, &d, 1.0, now());
        g.upsert_edge(&u, &d, 0.0, now());
        // (1.0 * 1 + 0.0) / 2
        assert!((g.edge(&u, &d).unwrap().weight - 0.5).abs() < 1e-9);

        g.upsert_edge(&u, &d, 0.5, now());
        // (0.5 * 2 + 0.5) / 3
        assert!((g.edge(&u, &d).unwrap().weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_neighbors_directions() {
        let mut g = Graph::new();
        let u = EntityId::user("u1");
        let d = EntityId::device("d1");
        let i = EntityId::ip("10.0.0.1");

        g.upsert_edge(&u, &d, 0.8, now());
        g.upsert_edge(&d, &i, 0.9, now());

        let out: Vec<_> = g.neighbors(&d, Direction::Out).into_iter().map(|(n, _)| n).collect();
        assert_eq!(out, vec![i.clone()]);

        let inbound: Vec<_> = g.neighbors(&d, Direction::In).into_iter().map(|(n, _)| n).collect();
        assert_eq!(inbound, vec![u.clone()]);

        let both: Vec<_> = g.neighbors(&d, Direction::Both).into_iter().map(|(n, _)| n).collect();
        assert_eq!(both.len(), 2);
        assert!(both.contains(&u) && both.contains(&i));
    }

    #[test]
    fn test_neighbors_sorted_ascending() {
        let mut g = Graph::new();
        let u = EntityId::user("u1");
        for id in ["c", "a", "b"] {
            g.upsert_edge(&u, &EntityId::device(id), 0.5, now());
        }
        let names: Vec<String> = g
            .neighbors(&u, Direction::Out)
            .into_iter()
            .map(|(n, _)| n.id)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_neighborhood_bounded_depth() {
        let mut g = Graph::new();
        let u = EntityId::user("u1");
        let d = EntityId::device("d1");
        let i = EntityId::ip("i1");
        let m = EntityId::merchant("m1");
        g.upsert_edge(&u, &d, 1.0, now());
        g.upsert_edge(&d, &i, 1.0, now());
        g.upsert_edge(&i, &m, 1.0, now());

        let hood = g.neighborhood(&[u.clone()], 2);
        assert!(hood.contains(&u) && hood.contains(&d) && hood.contains(&i));
        assert!(!hood.contains(&m));
    }

    #[test]
    fn test_snapshot_counts_by_kind() {
        let mut g = Graph::new();
        g.upsert_node(&EntityId::user("u1"), 0.0, now());
        g.upsert_node(&EntityId::user("u2"), 0.0, now());
        g.upsert_edge(&EntityId::user("u1"), &EntityId::device("d1"), 0.8, now());

        let snap = g.snapshot();
        assert_eq!(snap.nodes, 3);
        assert_eq!(snap.edges, 1);
        assert_eq!(snap.nodes_by_kind["user"], 2);
        assert_eq!(snap.nodes_by_kind["device"], 1);
        assert_eq!(snap.nodes_by_kind["card"], 0);
    }

    #[test]
    fn test_prune_cascades_to_edges() {
        let mut g = Graph::new();
        let t0 = now() - Duration::days(60);
        let u = EntityId::user("old");
        let d = EntityId::device("fresh");
        g.upsert_node(&u, 0.2, t0);
        g.upsert_edge(&u, &d, 0.8, t0);
        g.set_risk(&d, 0.1, now());

        let removed = g.prune(Duration::days(30), now());
        assert_eq!(removed, 1);
        assert!(g.node(&u).is_none());
        assert!(g.node(&d).is_some());
        assert_eq!(g.edge_count(), 0);
        assert!(g.neighbors(&d, Direction::In).is_empty());
    }

    #[test]
    fn test_last_seen_monotone_under_out_of_order_events() {
        let mut g = Graph::new();
        let u = EntityId::user("u1");
        let t0 = now();
        g.upsert_node(&u, 0.0, t0);
        g.upsert_node(&u, 0.0, t0 - Duration::seconds(10));
        assert_eq!(g.node(&u).unwrap().last_seen, t0);
    }
}
