//! End-to-end scenarios for the scoring pipeline, run against an engine with
//! an in-memory cache and a disabled durable sink.

use std::sync::Arc;

use riskmesh::cache::{CacheConfig, RiskCache};
use riskmesh::types::Recommendation;
use riskmesh::{EngineConfig, EntityId, EventRequest, RiskEngine};

fn event(user: &str, device: &str, ip: &str, merchant: &str, amount: f64) -> EventRequest {
    EventRequest {
        user_id: user.to_string(),
        device_id: device.to_string(),
        ip_address: ip.to_string(),
        merchant_id: merchant.to_string(),
        transaction_amount: amount,
        card_id: None,
    }
}

fn engine_without_cache() -> RiskEngine {
    let cache = Arc::new(RiskCache::new_memory(CacheConfig {
        enabled: false,
        ..Default::default()
    }));
    RiskEngine::builder(EngineConfig::default()).cache(cache).build()
}

/// Cold start: low amount, fresh entities. New-device, new-IP, and
/// new-merchant rules fire for 0.5; the empty neighborhood yields no boost.
#[tokio::test]
async fn cold_start_scores_half_and_recommends_review() {
    let engine = engine_without_cache();
    let response = engine
        .process_event("demo", event("u1", "d1", "i1", "m1", 50.0))
        .await
        .unwrap();

    assert!((response.base_risk - 0.5).abs() < 1e-9);
    assert_eq!(response.clustering_boost, 0.0);
    assert!((response.risk_score - 0.5).abs() < 1e-9);
    assert_eq!(response.explanation.recommendation, Recommendation::Review);
    assert!(!response.cached);
    assert!(!response.depth_truncated);
}

/// Resending the same low-amount event: every entity is known now, so no
/// rule fires and the fresh base risk wins.
#[tokio::test]
async fn repeat_event_scores_zero_and_recommends_approve() {
    let engine = engine_without_cache();
    let e = event("u1", "d1", "i1", "m1", 50.0);
    engine.process_event("demo", e.clone()).await.unwrap();

    let response = engine.process_event("demo", e).await.unwrap();
    assert_eq!(response.base_risk, 0.0);
    assert!(response.risk_score < 0.3);
    assert_eq!(response.explanation.recommendation, Recommendation::Approve);
    // Below the propagation threshold nothing spreads.
    assert_eq!(response.propagation_depth, 0);
}

/// Threshold gating: with all entities known and a low amount, base risk is
/// below 0.1, propagation is skipped, and neighbors keep their prior risk.
#[tokio::test]
async fn below_threshold_leaves_neighbors_unchanged() {
    let engine = engine_without_cache();
    engine
        .process_event("demo", event("u1", "d1", "i1", "m1", 50.0))
        .await
        .unwrap();

    let device_risk_before = engine.graph().read().risk(&EntityId::device("d1"));
    assert!(device_risk_before > 0.0);

    let response = engine
        .process_event("demo", event("u1", "d1", "i1", "m1", 50.0))
        .await
        .unwrap();
    assert_eq!(response.propagation_depth, 0);

    let device_risk_after = engine.graph().read().risk(&EntityId::device("d1"));
    assert!((device_risk_after - device_risk_before).abs() < 1e-6);
}

/// Fraud ring formation: three users hammering the same device and IP with
/// high amounts. By the third event the shared neighborhood is risky enough
/// for the ring detector, and the user collects the +0.15 boost.
#[tokio::test]
async fn shared_device_users_form_a_ring() {
    let engine = engine_without_cache();
    engine
        .process_event("demo", event("u1", "d1", "i1", "m1", 1500.0))
        .await
        .unwrap();
    engine
        .process_event("demo", event("u2", "d1", "i1", "m1", 1500.0))
        .await
        .unwrap();
    let response = engine
        .process_event("demo", event("u3", "d1", "i1", "m1", 1500.0))
        .await
        .unwrap();

    assert!(!response.clustering_info.rings.is_empty());
    assert!((response.clustering_boost - 0.15).abs() < 1e-9);
    assert!(response.risk_score >= 0.45);
    assert_eq!(response.explanation.recommendation, Recommendation::Challenge);

    let ring = &response.clustering_info.rings[0];
    for member in ["user:u1", "user:u2", "user:u3", "device:d1", "ip:i1"] {
        assert!(
            ring.members.iter().any(|m| m == member),
            "ring missing {}: {:?}",
            member,
            ring.members
        );
    }
}

/// Cache hit: the same event from the same principal within the TTL returns
/// the stored response flagged as cached, with the identical score.
#[tokio::test]
async fn repeated_event_hits_the_cache() {
    let engine = RiskEngine::builder(EngineConfig::default()).build();
    let e = event("u1", "d1", "i1", "m1", 50.0);

    let first = engine.process_event("demo", e.clone()).await.unwrap();
    assert!(!first.cached);

    let second = engine.process_event("demo", e).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.risk_score, first.risk_score);
    assert_eq!(second.transaction_id, first.transaction_id);
}

/// Different principals never share cache entries.
#[tokio::test]
async fn cache_entries_are_scoped_per_principal() {
    let engine = RiskEngine::builder(EngineConfig::default()).build();
    let e = event("u1", "d1", "i1", "m1", 50.0);

    engine.process_event("demo", e.clone()).await.unwrap();
    let other = engine.process_event("test", e).await.unwrap();
    assert!(!other.cached);
}

/// Universal invariants after a busy sequence: risks and weights stay in
/// [0,1] and every edge has been observed at least once.
#[tokio::test]
async fn invariants_hold_after_event_burst() {
    let engine = engine_without_cache();
    for round in 0..5 {
        for user in ["u1", "u2", "u3"] {
            engine
                .process_event(
                    "demo",
                    event(user, "d1", "i1", "m1", 1500.0 + round as f64),
                )
                .await
                .unwrap();
        }
    }

    let graph = engine.graph().read();
    let snapshot = graph.snapshot();
    assert!(snapshot.nodes >= 6);

    for user in ["u1", "u2", "u3"] {
        let node = graph.node(&EntityId::user(user)).unwrap();
        assert!((0.0..=1.0).contains(&node.risk_score));
        assert_eq!(node.interaction_count, 5);
        assert!(node.last_seen >= node.first_seen);
    }
    for (neighbor, edge) in graph.neighbors(&EntityId::device("d1"), riskmesh::Direction::Both) {
        assert!((0.0..=1.0).contains(&edge.weight), "weight out of range toward {}", neighbor);
        assert!(edge.interaction_count >= 1);
        assert!(edge.last_seen >= edge.first_seen);
    }
}

/// Base risk stays bounded even when every rule fires.
#[tokio::test]
async fn base_risk_bounded_by_one() {
    let engine = engine_without_cache();
    let response = engine
        .process_event("demo", event("u9", "d9", "i9", "m9", 50_000.0))
        .await
        .unwrap();
    assert!(response.base_risk <= 1.0);
    assert!((response.base_risk - 0.8).abs() < 1e-9);
}

/// The explanation breakdown is internally consistent.
#[tokio::test]
async fn breakdown_fields_reconcile() {
    let engine = engine_without_cache();
    let response = engine
        .process_event("demo", event("u1", "d1", "i1", "m1", 1500.0))
        .await
        .unwrap();

    let breakdown = &response.explanation.calculation_breakdown;
    assert_eq!(breakdown.base_risk, response.base_risk);
    assert_eq!(breakdown.cluster_boost, response.clustering_boost);
    assert_eq!(breakdown.final_risk, response.risk_score);
    assert!(breakdown.final_risk <= 1.0);
}
