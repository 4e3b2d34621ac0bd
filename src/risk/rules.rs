//! # Base Risk Rules
//!
//! Heuristic scoring of an incoming event before any propagation. Rules see
//! the event plus the graph as it stood *before* this event's edges were
//! applied, so "new device" means the edge does not exist yet. The rule set
//! is additive and clamped to 1.0; adding a rule means adding one
//! [`RiskRule`] implementation.

use crate::graph::Graph;
use crate::types::{clamp_unit, EntityId, EventRequest};

/// Everything a rule may look at
pub struct RuleContext<'a> {
    pub event: &'a EventRequest,
    pub graph: &'a Graph,
    pub user: &'a EntityId,
    pub device: &'a EntityId,
    pub ip: &'a EntityId,
    pub merchant: &'a EntityId,
}

/// A rule that fired, with its contribution
#[derive(Debug, Clone)]
pub struct RuleHit {
    pub rule: &'static str,
    pub contribution: f64,
    pub detail: String,
}

/// A single pluggable heuristic
pub trait RiskRule: Send + Sync {
    fn name(&self) -> &'static str;
    /// Returns a hit when the rule fires, `None` otherwise.
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<RuleHit>;
}

/// Transaction amount above a configured threshold
pub struct HighAmountRule {
    pub threshold: f64,
    pub contribution: f64,
}

impl RiskRule for HighAmountRule {
    fn name(&self) -> &'static str {
        "high_amount"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<RuleHit> {
        if ctx.event.transaction_amount > self.threshold {
            Some(RuleHit {
                rule: self.name(),
                contribution: self.contribution,
                detail: format!(
                    "amount {:.2} exceeds threshold {:.2}",
                    ctx.event.transaction_amount, self.threshold
                ),
            })
        } else {
            None
        }
    }
}

/// No user→device edge yet
pub struct NewDeviceRule {
    pub contribution: f64,
}

impl RiskRule for NewDeviceRule {
    fn name(&self) -> &'static str {
        "new_device"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<RuleHit> {
        if ctx.graph.has_edge(ctx.user, ctx.device) {
            None
        } else {
            Some(RuleHit {
                rule: self.name(),
                contribution: self.contribution,
                detail: format!("device '{}' not seen before for this user", ctx.event.device_id),
            })
        }
    }
}

/// No user→ip edge yet
pub struct NewIpRule {
    pub contribution: f64,
}

impl RiskRule for NewIpRule {
    fn name(&self) -> &'static str {
        "new_ip"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<RuleHit> {
        if ctx.graph.has_edge(ctx.user, ctx.ip) {
            None
        } else {
            Some(RuleHit {
                rule: self.name(),
                contribution: self.contribution,
                detail: format!("IP '{}' not seen before for this user", ctx.event.ip_address),
            })
        }
    }
}

/// Neither the user nor the device has touched this merchant
pub struct NewMerchantRule {
    pub contribution: f64,
}

impl RiskRule for NewMerchantRule {
    fn name(&self) -> &'static str {
        "new_merchant"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<RuleHit> {
        if ctx.graph.has_edge(ctx.user, ctx.merchant)
            || ctx.graph.has_edge(ctx.device, ctx.merchant)
        {
            None
        } else {
            Some(RuleHit {
                rule: self.name(),
                contribution: self.contribution,
                detail: format!("merchant '{}' not previously used", ctx.event.merchant_id),
            })
        }
    }
}

/// Result of evaluating the full rule set
#[derive(Debug, Clone, Default)]
pub struct BaseRiskAssessment {
    pub hits: Vec<RuleHit>,
    /// Sum of contributions, clamped to 1.0
    pub total: f64,
}

/// Ordered collection of rules
pub struct RuleSet {
    rules: Vec<Box<dyn RiskRule>>,
}

impl RuleSet {
    /// The standard rule table: +0.30 high amount, +0.20 new device,
    /// +0.20 new IP, +0.10 new merchant.
    pub fn standard(high_amount_threshold: f64) -> Self {
        Self {
            rules: vec![
                Box::new(HighAmountRule { threshold: high_amount_threshold, contribution: 0.30 }),
                Box::new(NewDeviceRule { contribution: 0.20 }),
                Box::new(NewIpRule { contribution: 0.20 }),
                Box::new(NewMerchantRule { contribution: 0.10 }),
            ],
        }
    }

    /// Extend the set with a custom rule.
    pub fn with_rule(mut self, rule: Box<dyn RiskRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> BaseRiskAssessment {
        let hits: Vec<RuleHit> = self.rules.iter().filter_map(|rule| rule.evaluate(ctx)).collect();
        let total = clamp_unit(hits.iter().map(|hit| hit.contribution).sum());
        BaseRiskAssessment { hits, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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

    fn evaluate(graph: &Graph, event: &EventRequest) -> BaseRiskAssessment {
        let user = EntityId::user(&event.user_id);
        let device = EntityId::device(&event.device_id);
        let ip = EntityId::ip(&event.ip_address);
        let merchant = EntityId::merchant(&event.merchant_id);
        RuleSet::standard(1000.0).evaluate(&RuleContext {
            event,
            graph,
            user: &user,
            device: &device,
            ip: &ip,
            merchant: &merchant,
        })
    }

    #[test]
    fn test_cold_start_low_amount_scores_half() {
        let graph = Graph::new();
        let assessment = evaluate(&graph, &event(50.0));
        // new device + new IP + new merchant
        assert!((assessment.total - 0.5).abs() < 1e-9);
        assert_eq!(assessment.hits.len(), 3);
    }

    #[test]
    fn test_cold_start_high_amount_scores_eight_tenths() {
        let graph = Graph::new();
        let assessment = evaluate(&graph, &event(1500.0));
        assert!((assessment.total - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_known_entities_low_amount_scores_zero() {
        let mut graph = Graph::new();
        let now = Utc::now();
        graph.upsert_edge(&EntityId::user("u1"), &EntityId::device("d1"), 0.8, now);
        graph.upsert_edge(&EntityId::user("u1"), &EntityId::ip("10.0.0.1"), 0.7, now);
        graph.upsert_edge(&EntityId::user("u1"), &EntityId::merchant("m1"), 0.6, now);

        let assessment = evaluate(&graph, &event(50.0));
        assert_eq!(assessment.total, 0.0);
        assert!(assessment.hits.is_empty());
    }

    #[test]
    fn test_device_merchant_edge_satisfies_merchant_rule() {
        let mut graph = Graph::new();
        let now = Utc::now();
        graph.upsert_edge(&EntityId::user("u1"), &EntityId::device("d1"), 0.8, now);
        graph.upsert_edge(&EntityId::user("u1"), &EntityId::ip("10.0.0.1"), 0.7, now);
        graph.upsert_edge(&EntityId::device("d1"), &EntityId::merchant("m1"), 0.6, now);

        let assessment = evaluate(&graph, &event(50.0));
        assert_eq!(assessment.total, 0.0);
    }

    #[test]
    fn test_total_clamped_to_one() {
        struct AlwaysRule;
        impl RiskRule for AlwaysRule {
            fn name(&self) -> &'static str {
                "always"
            }
            fn evaluate(&self, _: &RuleContext<'_>) -> Option<RuleHit> {
                Some(RuleHit { rule: "always", contribution: 0.9, detail: String::new() })
            }
        }

        let graph = Graph::new();
        let e = event(1500.0);
        let user = EntityId::user("u1");
        let device = EntityId::device("d1");
        let ip = EntityId::ip("10.0.0.1");
        let merchant = EntityId::merchant("m1");
        let set = RuleSet::standard(1000.0).with_rule(Box::new(AlwaysRule));
        let assessment = set.evaluate(&RuleContext {
            event: &e,
            graph: &graph,
            user: &user,
            device: &device,
            ip: &ip,
            merchant: &merchant,
        });
        assert_eq!(assessment.total, 1.0);
    }
}
