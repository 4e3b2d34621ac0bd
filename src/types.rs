//! # Core Types
//!
//! Fundamental types shared across the RiskMesh engine: entity identities,
//! ingest events, scoring responses, and the error taxonomy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a processed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Create a new random transaction ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of entity kinds tracked by the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Device,
    Ip,
    Merchant,
    Card,
}

impl EntityKind {
    /// All kinds, in identity order
    pub const ALL: [EntityKind; 5] = [
        EntityKind::User,
        EntityKind::Device,
        EntityKind::Ip,
        EntityKind::Merchant,
        EntityKind::Card,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Device => "device",
            EntityKind::Ip => "ip",
            EntityKind::Merchant => "merchant",
            EntityKind::Card => "card",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a graph entity: `(kind, id)`. Ids from different kinds never
/// collide because the kind is part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityId {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(EntityKind::User, id)
    }

    pub fn device(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Device, id)
    }

    pub fn ip(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Ip, id)
    }

    pub fn merchant(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Merchant, id)
    }

    pub fn card(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Card, id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Incoming transaction event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRequest {
    pub user_id: String,
    pub device_id: String,
    pub ip_address: String,
    pub merchant_id: String,
    pub transaction_amount: f64,
    /// Optional card; when present the card is tracked with the same
    /// contract as a device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
}

impl EventRequest {
    /// Reject empty identifiers and non-finite or negative amounts.
    pub fn validate(&self) -> RiskMeshResult<()> {
        let required = [
            ("user_id", &self.user_id),
            ("device_id", &self.device_id),
            ("ip_address", &self.ip_address),
            ("merchant_id", &self.merchant_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(RiskMeshError::Validation(format!(
                    "field '{}' must be a non-empty string",
                    field
                )));
            }
        }
        if let Some(card) = &self.card_id {
            if card.trim().is_empty() {
                return Err(RiskMeshError::Validation(
                    "field 'card_id' must be non-empty when present".to_string(),
                ));
            }
        }
        if !self.transaction_amount.is_finite() || self.transaction_amount < 0.0 {
            return Err(RiskMeshError::Validation(format!(
                "transaction_amount must be a non-negative number, got {}",
                self.transaction_amount
            )));
        }
        Ok(())
    }
}

/// Action recommendation derived from the final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Approve,
    Review,
    Challenge,
}

/// Numeric trail of how the final score was reached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationBreakdown {
    pub base_risk: f64,
    pub after_propagation: f64,
    pub after_time_decay: f64,
    pub cluster_boost: f64,
    pub final_risk: f64,
}

/// Human-readable companion to every score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub recommendation: Recommendation,
    pub reason: String,
    pub calculation_breakdown: CalculationBreakdown,
}

/// A detected ring or dense cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMembers {
    pub members: Vec<String>,
    pub size: usize,
    pub avg_risk: f64,
}

/// A detected star pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarPattern {
    pub hub: String,
    pub spokes: usize,
    pub hub_risk: f64,
}

/// Topological findings for the event's neighborhood
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusteringInfo {
    pub rings: Vec<ClusterMembers>,
    pub dense_subgraphs: Vec<ClusterMembers>,
    pub star_patterns: Vec<StarPattern>,
}

/// Scoring response returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskResponse {
    pub transaction_id: TransactionId,
    pub risk_score: f64,
    pub base_risk: f64,
    pub clustering_boost: f64,
    pub propagation_depth: usize,
    pub depth_truncated: bool,
    pub total_latency_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub cached: bool,
    pub explanation: Explanation,
    pub clustering_info: ClusteringInfo,
}

/// Error taxonomy for the engine and its collaborators
#[derive(Debug, thiserror::Error)]
pub enum RiskMeshError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limit exceeded for '{principal}', retry after {retry_after_secs}s")]
    RateLimited {
        principal: String,
        retry_after_secs: u64,
    },

    #[error("Unknown principal")]
    UnknownPrincipal,

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Durable sink error: {0}")]
    Sink(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal invariant violation: {0}")]
    Invariant(String),
}

/// Result type for RiskMesh operations
pub type RiskMeshResult<T> = Result<T, RiskMeshError>;

/// Clamp a score or weight into the unit interval.
pub fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// A transaction is flagged when its final score crosses this line.
pub const FLAGGED_THRESHOLD: f64 = 0.6;

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> EventRequest {
        EventRequest {
            user_id: "u1".to_string(),
            device_id: "d1".to_string(),
            ip_address: "10.0.0.1".to_string(),
            merchant_id: "m1".to_string(),
            transaction_amount: 50.0,
            card_id: None,
        }
    }

    #[test]
    fn test_entity_id_display() {
        assert_eq!(EntityId::user("u1").to_string(), "user:u1");
        assert_eq!(EntityId::ip("10.0.0.1").to_string(), "ip:10.0.0.1");
    }

    #[test]
    fn test_entity_ids_distinct_across_kinds() {
        assert_ne!(EntityId::user("x"), EntityId::device("x"));
    }

    #[test]
    fn test_event_validation_accepts_well_formed() {
        assert!(event().validate().is_ok());
    }

    #[test]
    fn test_event_validation_rejects_empty_field() {
        let mut e = event();
        e.device_id = "  ".to_string();
        assert!(matches!(e.validate(), Err(RiskMeshError::Validation(_))));
    }

    #[test]
    fn test_event_validation_rejects_bad_amount() {
        let mut e = event();
        e.transaction_amount = -1.0;
        assert!(e.validate().is_err());
        e.transaction_amount = f64::NAN;
        assert!(e.validate().is_err());
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }
}
