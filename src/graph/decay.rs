//! # Time Decay
//!
//! Exponential erosion of stored risk so stale evidence fades. Decay is
//! lazy: it is applied just before a node participates in base-risk
//! evaluation or propagation, never by a background sweeper.

use chrono::{DateTime, Utc};

use crate::types::EntityId;

use super::store::Graph;

/// Lazy exponential decay with a floor for ever-risky entities.
///
/// `decayed = max(risk * factor^days, floor)` for risks above the floor.
/// Risks at or below the floor are left untouched, so decay over zero
/// elapsed time is the identity and an entity that was never risky is not
/// raised to the floor.
#[derive(Debug, Clone)]
pub struct TimeDecay {
    factor: f64,
    floor: f64,
}

impl TimeDecay {
    pub fn new(factor: f64, floor: f64) -> Self {
        Self { factor, floor }
    }

    /// Pure decay computation. Negative elapsed time (clock skew) counts as
    /// zero.
    pub fn decayed(&self, risk: f64, last_seen: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        if risk <= self.floor {
            return risk;
        }
        let elapsed = (now - last_seen).num_milliseconds().max(0) as f64;
        let days = elapsed / (24.0 * 3600.0 * 1000.0);
        (risk * self.factor.powf(days)).max(self.floor)
    }

    /// Apply decay to a stored node in place and move its `last_seen` to
    /// `now`. Unknown nodes are a no-op. Returns the decayed risk.
    pub fn apply_to_node(&self, graph: &mut Graph, id: &EntityId, now: DateTime<Utc>) -> f64 {
        let Some(node) = graph.node(id) else {
            return 0.0;
        };
        let decayed = self.decayed(node.risk_score, node.last_seen, now);
        graph.set_risk(id, decayed, now);
        decayed
    }
}

impl Default for TimeDecay {
    fn default() -> Self {
        Self::new(0.995, 0.01)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_zero_elapsed_is_identity() {
        let decay = TimeDecay::default();
        let t = Utc::now();
        assert_eq!(decay.decayed(0.5, t, t), 0.5);
        assert_eq!(decay.decayed(0.0, t, t), 0.0);
        assert_eq!(decay.decayed(0.005, t, t), 0.005);
    }

    #[test]
    fn test_decay_monotone_non_increasing() {
        let decay = TimeDecay::default();
        let t = Utc::now();
        let mut previous = 0.8;
        for days in 1..=120 {
            let current = decay.decayed(0.8, t, t + Duration::days(days));
            assert!(current <= previous, "day {}: {} > {}", days, current, previous);
            previous = current;
        }
    }

    #[test]
    fn test_one_day_decay_rate() {
        let decay = TimeDecay::default();
        let t = Utc::now();
        let decayed = decay.decayed(1.0, t, t + Duration::days(1));
        assert!((decayed - 0.995).abs() < 1e-6);
    }

    #[test]
    fn test_floor_prevents_total_forgetting() {
        let decay = TimeDecay::default();
        let t = Utc::now();
        let decayed = decay.decayed(0.9, t, t + Duration::days(3650));
        assert_eq!(decayed, 0.01);
    }

    #[test]
    fn test_never_risky_stays_at_zero() {
        let decay = TimeDecay::default();
        let t = Utc::now();
        assert_eq!(decay.decayed(0.0, t, t + Duration::days(30)), 0.0);
    }

    #[test]
    fn test_clock_skew_treated_as_zero_elapsed() {
        let decay = TimeDecay::default();
        let t = Utc::now();
        assert_eq!(decay.decayed(0.5, t, t - Duration::days(1)), 0.5);
    }

    #[test]
    fn test_apply_to_node_updates_last_seen() {
        let mut g = Graph::new();
        let u = EntityId::user("u1");
        let t0 = Utc::now() - Duration::days(10);
        g.upsert_node(&u, 0.6, t0);

        let decay = TimeDecay::default();
        let now = Utc::now();
        let risk = decay.apply_to_node(&mut g, &u, now);

        assert!(risk < 0.6 && risk > 0.5);
        let node = g.node(&u).unwrap();
        assert_eq!(node.risk_score, risk);
        assert_eq!(node.last_seen, now);
    }
}
