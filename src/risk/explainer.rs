//! # Risk Explainer
//!
//! Turns the numeric trail of one scored event into the human-readable
//! artifact that accompanies every response. No graph work happens here; all
//! inputs were produced by the rules, propagator, and clustering detector.

use crate::graph::{ClusterReport, PropagationOutcome};
use crate::risk::rules::BaseRiskAssessment;
use crate::types::{CalculationBreakdown, EntityId, Explanation, Recommendation};

/// Assembles recommendations and breakdowns
#[derive(Debug, Clone, Default)]
pub struct Explainer;

impl Explainer {
    /// Score thresholds: <0.3 approve, <0.6 review, else challenge.
    pub fn recommendation(score: f64) -> Recommendation {
        if score < 0.3 {
            Recommendation::Approve
        } else if score < 0.6 {
            Recommendation::Review
        } else {
            Recommendation::Challenge
        }
    }

    /// Build the explanation for one event.
    ///
    /// `decayed_prior` is the user's risk after lazy decay at event start,
    /// before this event's base risk was applied.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        assessment: &BaseRiskAssessment,
        outcome: &PropagationOutcome,
        report: &ClusterReport,
        user: &EntityId,
        decayed_prior: f64,
        cluster_boost: f64,
        final_risk: f64,
    ) -> Explanation {
        let mut reasons: Vec<String> = Vec::new();

        let mut hits = assessment.hits.clone();
        hits.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
        for hit in hits.iter().take(2) {
            reasons.push(hit.detail.clone());
        }

        if report.ring_members.contains(user) {
            reasons.push("member of a suspected fraud ring".to_string());
        } else if cluster_boost > 0.0 {
            reasons.push("connected to a suspicious cluster".to_string());
        }

        let spread = outcome.updates.len().saturating_sub(1);
        if spread > 0 {
            reasons.push(format!(
                "risk spread to {} neighboring entit{}",
                spread,
                if spread == 1 { "y" } else { "ies" }
            ));
        }

        let reason = if reasons.is_empty() {
            "no risk factors triggered".to_string()
        } else {
            reasons.join("; ")
        };

        let after_propagation = outcome.updates.get(user).copied().unwrap_or(assessment.total);

        Explanation {
            recommendation: Self::recommendation(final_risk),
            reason,
            calculation_breakdown: CalculationBreakdown {
                base_risk: assessment.total,
                after_propagation,
                after_time_decay: decayed_prior,
                cluster_boost,
                final_risk,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::rules::RuleHit;
    use std::collections::BTreeMap;

    fn outcome_for(user: &EntityId, risk: f64) -> PropagationOutcome {
        let mut updates = BTreeMap::new();
        updates.insert(user.clone(), risk);
        PropagationOutcome { updates, depth_reached: 0, truncated: false }
    }

    #[test]
    fn test_recommendation_thresholds() {
        assert_eq!(Explainer::recommendation(0.0), Recommendation::Approve);
        assert_eq!(Explainer::recommendation(0.29), Recommendation::Approve);
        assert_eq!(Explainer::recommendation(0.3), Recommendation::Review);
        assert_eq!(Explainer::recommendation(0.59), Recommendation::Review);
        assert_eq!(Explainer::recommendation(0.6), Recommendation::Challenge);
        assert_eq!(Explainer::recommendation(1.0), Recommendation::Challenge);
    }

    #[test]
    fn test_quiet_event_has_neutral_reason() {
        let user = EntityId::user("u1");
        let explanation = Explainer::assemble(
            &BaseRiskAssessment::default(),
            &outcome_for(&user, 0.0),
            &ClusterReport::default(),
            &user,
            0.0,
            0.0,
            0.0,
        );
        assert_eq!(explanation.reason, "no risk factors triggered");
        assert_eq!(explanation.recommendation, Recommendation::Approve);
    }

    #[test]
    fn test_reason_names_top_rules_and_ring() {
        let user = EntityId::user("u1");
        let assessment = BaseRiskAssessment {
            hits: vec![
                RuleHit { rule: "new_device", contribution: 0.2, detail: "device 'd9' not seen before for this user".to_string() },
                RuleHit { rule: "high_amount", contribution: 0.3, detail: "amount 1500.00 exceeds threshold 1000.00".to_string() },
            ],
            total: 0.5,
        };
        let mut report = ClusterReport::default();
        report.ring_members.insert(user.clone());

        let explanation = Explainer::assemble(
            &assessment,
            &outcome_for(&user, 0.5),
            &report,
            &user,
            0.1,
            0.15,
            0.65,
        );

        // Highest-contribution rule leads the reason.
        assert!(explanation.reason.starts_with("amount 1500.00"));
        assert!(explanation.reason.contains("fraud ring"));
        assert_eq!(explanation.recommendation, Recommendation::Challenge);
        assert_eq!(explanation.calculation_breakdown.cluster_boost, 0.15);
        assert_eq!(explanation.calculation_breakdown.final_risk, 0.65);
    }
}
