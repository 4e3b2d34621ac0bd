//! # Risk Engine
//!
//! Orchestrates one event end to end: cache probe, graph mutation under a
//! single write lock (decay, upserts, base risk, propagation, clustering),
//! then the unlocked tail (durable sink, metrics, explanation, cache fill).
//! This is the only component that touches the durable sink or the cache.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::{CacheConfig, CacheKeys, CacheTtl, RiskCache};
use crate::config::EngineConfig;
use crate::graph::{ClusteringDetector, GraphStore, Propagator, TimeDecay};
use crate::metrics::{
    CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, ERRORS_TOTAL, EVENT_RATE, GRAPH_EDGES, GRAPH_NODES,
    PROPAGATION_LATENCY_MS, REQUESTS_TOTAL, REQUEST_LATENCY_MS,
};
use crate::risk::explainer::Explainer;
use crate::risk::rules::{RuleContext, RuleSet};
use crate::sink::{TransactionRecord, TransactionSink};
use crate::types::{
    EntityId, EventRequest, RiskMeshError, RiskMeshResult, RiskResponse, TransactionId,
};

/// Influence strength observed for each canonical relation
const WEIGHT_USER_DEVICE: f64 = 0.8;
const WEIGHT_USER_IP: f64 = 0.7;
const WEIGHT_USER_MERCHANT: f64 = 0.6;
const WEIGHT_DEVICE_IP: f64 = 0.9;
const WEIGHT_DEVICE_MERCHANT: f64 = 0.6;

/// Events-per-second window for the rate gauge
struct RateWindow {
    started: Instant,
    count: u64,
}

/// The online scoring engine. Re-entrant: per-event state lives on the
/// stack, shared state is the graph, cache, sink, and metrics.
pub struct RiskEngine {
    config: EngineConfig,
    graph: Arc<GraphStore>,
    cache: Arc<RiskCache>,
    sink: TransactionSink,
    decay: TimeDecay,
    propagator: Propagator,
    rules: RuleSet,
    detector: ClusteringDetector,
    known_ring_members: DashMap<EntityId, ()>,
    event_rate: Mutex<RateWindow>,
}

impl RiskEngine {
    pub fn builder(config: EngineConfig) -> RiskEngineBuilder {
        RiskEngineBuilder::new(config)
    }

    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    pub fn cache(&self) -> &Arc<RiskCache> {
        &self.cache
    }

    /// Stable hash of the event's identifying fields. Amounts are bucketed
    /// (width 10) so near-identical retries share a fingerprint.
    pub fn fingerprint(event: &EventRequest) -> String {
        let bucket = (event.transaction_amount / 10.0).floor() as i64;
        let mut hasher = Sha256::new();
        hasher.update(event.user_id.as_bytes());
        hasher.update(b"|");
        hasher.update(event.device_id.as_bytes());
        hasher.update(b"|");
        hasher.update(event.ip_address.as_bytes());
        hasher.update(b"|");
        hasher.update(event.merchant_id.as_bytes());
        hasher.update(b"|");
        hasher.update(bucket.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Score one event for `principal`.
    pub async fn process_event(
        &self,
        principal: &str,
        event: EventRequest,
    ) -> RiskMeshResult<RiskResponse> {
        let started = Instant::now();

        if let Err(e) = event.validate() {
            ERRORS_TOTAL.with_label_values(&["validation"]).inc();
            return Err(e);
        }

        let fingerprint = Self::fingerprint(&event);
        let cache_key = CacheKeys::propagation(principal, &fingerprint);
        match tokio::time::timeout(
            self.config.cache_read_deadline,
            self.cache.get::<RiskResponse>(&cache_key),
        )
        .await
        {
            Ok(Some(mut cached)) => {
                CACHE_HITS_TOTAL.inc();
                cached.cached = true;
                cached.total_latency_ms = elapsed_ms(started);
                REQUESTS_TOTAL.inc();
                REQUEST_LATENCY_MS.observe(cached.total_latency_ms);
                self.tick_event_rate();
                return Ok(cached);
            }
            Ok(None) => {
                CACHE_MISSES_TOTAL.inc();
            }
            Err(_) => {
                CACHE_MISSES_TOTAL.inc();
                debug!("Cache read exceeded sub-deadline, treating as miss");
            }
        }

        let now = Utc::now();
        let deadline = started + self.config.event_deadline;

        let user = EntityId::user(&event.user_id);
        let device = EntityId::device(&event.device_id);
        let ip = EntityId::ip(&event.ip_address);
        let merchant = EntityId::merchant(&event.merchant_id);
        let card = event.card_id.as_deref().map(EntityId::card);

        let mut canonical = vec![user.clone(), device.clone(), ip.clone(), merchant.clone()];
        if let Some(card) = &card {
            canonical.push(card.clone());
        }

        // Graph mutation phase. CPU-bound; nothing below may await while the
        // write guard is held.
        let (assessment, outcome, report, decayed_prior, boost, final_risk, snapshot) = {
            let mut graph = self.graph.write();

            for id in &canonical {
                self.decay.apply_to_node(&mut graph, id, now);
            }
            let decayed_prior = graph.risk(&user);
            for id in &canonical {
                graph.upsert_node(id, 0.0, now);
            }

            // Base risk reads edge presence before this event's edges land.
            let assessment = self.rules.evaluate(&RuleContext {
                event: &event,
                graph: &graph,
                user: &user,
                device: &device,
                ip: &ip,
                merchant: &merchant,
            });

            graph.upsert_edge(&user, &device, WEIGHT_USER_DEVICE, now);
            graph.upsert_edge(&user, &ip, WEIGHT_USER_IP, now);
            graph.upsert_edge(&user, &merchant, WEIGHT_USER_MERCHANT, now);
            graph.upsert_edge(&device, &ip, WEIGHT_DEVICE_IP, now);
            graph.upsert_edge(&device, &merchant, WEIGHT_DEVICE_MERCHANT, now);
            if let Some(card) = &card {
                graph.upsert_edge(&user, card, WEIGHT_USER_DEVICE, now);
                graph.upsert_edge(card, &ip, WEIGHT_DEVICE_IP, now);
                graph.upsert_edge(card, &merchant, WEIGHT_DEVICE_MERCHANT, now);
            }

            let propagation_started = Instant::now();
            let outcome = self.propagator.propagate(
                &mut graph,
                &self.decay,
                &user,
                assessment.total,
                now,
                Some(deadline),
            );
            PROPAGATION_LATENCY_MS.observe(elapsed_ms(propagation_started));

            let report = self.detector.detect(&graph, &canonical);
            for (id, boost) in &report.boosts {
                let risk = graph.risk(id);
                graph.set_risk(id, risk + boost, now);
            }
            let boost = report.boost_for(&user);
            let final_risk = graph.risk(&user);
            let snapshot = graph.snapshot();

            (assessment, outcome, report, decayed_prior, boost, final_risk, snapshot)
        };

        if !(0.0..=1.0).contains(&final_risk) {
            ERRORS_TOTAL.with_label_values(&["internal"]).inc();
            warn!(?event, final_risk, "Final risk escaped the unit interval");
            return Err(RiskMeshError::Invariant(format!(
                "final risk {} out of range for user '{}'",
                final_risk, event.user_id
            )));
        }

        GRAPH_NODES.set(snapshot.nodes as f64);
        GRAPH_EDGES.set(snapshot.edges as f64);

        let transaction_id = TransactionId::new();
        let total_latency_ms = elapsed_ms(started);

        self.sink.enqueue(TransactionRecord {
            id: transaction_id,
            user_id: event.user_id.clone(),
            device_id: event.device_id.clone(),
            ip_address: event.ip_address.clone(),
            merchant_id: event.merchant_id.clone(),
            card_id: event.card_id.clone(),
            transaction_amount: event.transaction_amount,
            risk_score: final_risk,
            propagation_depth: outcome.depth_reached as i32,
            latency_ms: total_latency_ms,
            timestamp: now,
        });

        REQUESTS_TOTAL.inc();
        REQUEST_LATENCY_MS.observe(total_latency_ms);
        self.tick_event_rate();

        let explanation = Explainer::assemble(
            &assessment,
            &outcome,
            &report,
            &user,
            decayed_prior,
            boost,
            final_risk,
        );

        let response = RiskResponse {
            transaction_id,
            risk_score: final_risk,
            base_risk: assessment.total,
            clustering_boost: boost,
            propagation_depth: outcome.depth_reached,
            depth_truncated: outcome.truncated,
            total_latency_ms,
            timestamp: now,
            cached: false,
            explanation,
            clustering_info: report.info.clone(),
        };

        self.cache.set(&cache_key, &response, CacheTtl::PROPAGATION).await;

        let newly_ringed = report.ring_members.contains(&user)
            && self.known_ring_members.insert(user.clone(), ()).is_none();
        if (final_risk - decayed_prior).abs() > 0.05 || newly_ringed {
            self.cache.invalidate(&CacheKeys::user_risk(&event.user_id)).await;
        } else {
            self.cache
                .set(&CacheKeys::user_risk(&event.user_id), &final_risk, CacheTtl::USER_RISK)
                .await;
        }
        self.cache
            .set(
                &CacheKeys::entity(device.kind, &event.device_id),
                &outcome.updates.get(&device).copied().unwrap_or(0.0),
                CacheTtl::ENTITY,
            )
            .await;
        self.cache
            .set(
                &CacheKeys::entity(ip.kind, &event.ip_address),
                &outcome.updates.get(&ip).copied().unwrap_or(0.0),
                CacheTtl::ENTITY,
            )
            .await;

        debug!(
            transaction = %transaction_id,
            risk = final_risk,
            depth = outcome.depth_reached,
            latency_ms = total_latency_ms,
            "Event scored"
        );

        Ok(response)
    }

    fn tick_event_rate(&self) {
        let mut window = self.event_rate.lock();
        window.count += 1;
        let elapsed = window.started.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            EVENT_RATE.set(window.count as f64 / elapsed);
            window.started = Instant::now();
            window.count = 0;
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Constructs a [`RiskEngine`], defaulting every collaborator that is not
/// supplied: fresh graph, memory cache, disabled sink, standard rules.
pub struct RiskEngineBuilder {
    config: EngineConfig,
    graph: Option<Arc<GraphStore>>,
    cache: Option<Arc<RiskCache>>,
    sink: Option<TransactionSink>,
    rules: Option<RuleSet>,
}

impl RiskEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self { config, graph: None, cache: None, sink: None, rules: None }
    }

    pub fn graph(mut self, graph: Arc<GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn cache(mut self, cache: Arc<RiskCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn sink(mut self, sink: TransactionSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn build(self) -> RiskEngine {
        let config = self.config;
        RiskEngine {
            decay: TimeDecay::new(config.decay_factor, config.min_risk_floor),
            propagator: Propagator::from_config(&config),
            detector: ClusteringDetector::from_config(&config),
            rules: self
                .rules
                .unwrap_or_else(|| RuleSet::standard(config.high_amount_threshold)),
            graph: self.graph.unwrap_or_else(|| Arc::new(GraphStore::new())),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(RiskCache::new_memory(CacheConfig::default()))),
            sink: self.sink.unwrap_or_else(TransactionSink::disabled),
            known_ring_members: DashMap::new(),
            event_rate: Mutex::new(RateWindow { started: Instant::now(), count: 0 }),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(amount: f64) -> EventRequest {
        EventRequest {
            user_id: "u1".to_string(),
            device_id: "d1".to_string(),
            ip_address: "10.0.0.1".to_string(),
            merchant_id: "m1".to_string(),
            transaction_amount: amount,
            card_id: None,
        }
    }

    #[test]
    fn test_fingerprint_stable_within_amount_bucket() {
        assert_eq!(
            RiskEngine::fingerprint(&event(52.0)),
            RiskEngine::fingerprint(&event(58.0))
        );
        assert_ne!(
            RiskEngine::fingerprint(&event(52.0)),
            RiskEngine::fingerprint(&event(62.0))
        );
    }

    #[test]
    fn test_fingerprint_covers_identity_fields() {
        let mut other = event(52.0);
        other.device_id = "d2".to_string();
        assert_ne!(RiskEngine::fingerprint(&event(52.0)), RiskEngine::fingerprint(&other));
    }

    #[tokio::test]
    async fn test_validation_rejected_before_graph_mutation() {
        let engine = RiskEngine::builder(EngineConfig::default()).build();
        let mut bad = event(50.0);
        bad.user_id = String::new();

        let result = engine.process_event("demo", bad).await;
        assert!(matches!(result, Err(RiskMeshError::Validation(_))));
        assert_eq!(engine.graph().snapshot().nodes, 0);
    }

    #[tokio::test]
    async fn test_interaction_count_tracks_events() {
        let engine = RiskEngine::builder(EngineConfig::default()).build();
        // Distinct amounts dodge the response cache.
        for amount in [10.0, 120.0, 230.0] {
            engine.process_event("demo", event(amount)).await.unwrap();
        }
        let graph = engine.graph().read();
        assert_eq!(graph.node(&EntityId::user("u1")).unwrap().interaction_count, 3);
    }

    #[tokio::test]
    async fn test_card_event_grows_graph_with_card_node() {
        let engine = RiskEngine::builder(EngineConfig::default()).build();
        let mut e = event(50.0);
        e.card_id = Some("c1".to_string());
        engine.process_event("demo", e).await.unwrap();

        let graph = engine.graph().read();
        assert!(graph.node(&EntityId::card("c1")).is_some());
        assert!(graph.has_edge(&EntityId::user("u1"), &EntityId::card("c1")));
        assert!(graph.has_edge(&EntityId::card("c1"), &EntityId::ip("10.0.0.1")));
    }
}
