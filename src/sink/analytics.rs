//! # Fraud Analytics
//!
//! Read-only aggregates over the stored transaction rows. These queries
//! never touch the graph and run entirely off the scoring hot path.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::error;

use crate::types::{RiskMeshError, RiskMeshResult, FLAGGED_THRESHOLD};

/// Risk score distribution over a lookback window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDistribution {
    pub total_transactions: i64,
    pub mean_risk: f64,
    pub max_risk: f64,
    pub low_risk_count: i64,
    pub medium_risk_count: i64,
    pub high_risk_count: i64,
}

/// One entry in the top-risky-users report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskyUser {
    pub user_id: String,
    pub transaction_count: i64,
    pub avg_risk: f64,
    pub max_risk: f64,
}

/// Behavioral profile for a single user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub total_transactions: i64,
    pub total_volume: f64,
    pub avg_amount: f64,
    pub max_amount: f64,
    pub avg_risk: f64,
    pub max_risk: f64,
    pub unique_devices: i64,
    pub unique_ips: i64,
    pub unique_merchants: i64,
    pub flagged_count: i64,
}

/// Rolling performance summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_transactions: i64,
    pub flagged_count: i64,
    pub flag_rate: f64,
    pub avg_latency_ms: f64,
    pub avg_propagation_depth: f64,
}

/// Analytics facade over the transaction store
#[derive(Clone)]
pub struct FraudAnalytics {
    pool: PgPool,
}

impl FraudAnalytics {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect independently of the sink (read-only pool).
    pub async fn connect(database_url: &str) -> RiskMeshResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| RiskMeshError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Risk-score distribution for the last `hours`.
    pub async fn risk_distribution(&self, hours: i64) -> RiskMeshResult<RiskDistribution> {
        let cutoff = Utc::now() - Duration::hours(hours);
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(AVG(risk_score), 0) AS mean_risk,
                COALESCE(MAX(risk_score), 0) AS max_risk,
                COUNT(*) FILTER (WHERE risk_score < 0.3) AS low_count,
                COUNT(*) FILTER (WHERE risk_score >= 0.3 AND risk_score < 0.6) AS medium_count,
                COUNT(*) FILTER (WHERE risk_score >= 0.6) AS high_count
            FROM transactions
            WHERE timestamp >= $1
            "#,
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Risk distribution query failed");
            RiskMeshError::Database(e.to_string())
        })?;

        Ok(RiskDistribution {
            total_transactions: row.try_get("total").unwrap_or(0),
            mean_risk: row.try_get("mean_risk").unwrap_or(0.0),
            max_risk: row.try_get("max_risk").unwrap_or(0.0),
            low_risk_count: row.try_get("low_count").unwrap_or(0),
            medium_risk_count: row.try_get("medium_count").unwrap_or(0),
            high_risk_count: row.try_get("high_count").unwrap_or(0),
        })
    }

    /// Users ranked by average risk.
    pub async fn top_risky_users(&self, limit: i64) -> RiskMeshResult<Vec<RiskyUser>> {
        let rows = sqlx::query(
            r#"
            SELECT
                user_id,
                COUNT(*) AS tx_count,
                AVG(risk_score) AS avg_risk,
                MAX(risk_score) AS max_risk
            FROM transactions
            GROUP BY user_id
            ORDER BY AVG(risk_score) DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Top risky users query failed");
            RiskMeshError::Database(e.to_string())
        })?;

        Ok(rows
            .into_iter()
            .map(|row| RiskyUser {
                user_id: row.try_get("user_id").unwrap_or_default(),
                transaction_count: row.try_get("tx_count").unwrap_or(0),
                avg_risk: row.try_get("avg_risk").unwrap_or(0.0),
                max_risk: row.try_get("max_risk").unwrap_or(0.0),
            })
            .collect())
    }

    /// Transaction profile for one user over the last `days`.
    pub async fn user_profile(&self, user_id: &str, days: i64) -> RiskMeshResult<UserProfile> {
        let cutoff = Utc::now() - Duration::days(days);
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(transaction_amount), 0) AS volume,
                COALESCE(AVG(transaction_amount), 0) AS avg_amount,
                COALESCE(MAX(transaction_amount), 0) AS max_amount,
                COALESCE(AVG(risk_score), 0) AS avg_risk,
                COALESCE(MAX(risk_score), 0) AS max_risk,
                COUNT(DISTINCT device_id) AS devices,
                COUNT(DISTINCT ip_address) AS ips,
                COUNT(DISTINCT merchant_id) AS merchants,
                COUNT(*) FILTER (WHERE risk_score >= $3) AS flagged
            FROM transactions
            WHERE user_id = $1 AND timestamp >= $2
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .bind(FLAGGED_THRESHOLD)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, user_id, "User profile query failed");
            RiskMeshError::Database(e.to_string())
        })?;

        Ok(UserProfile {
            user_id: user_id.to_string(),
            total_transactions: row.try_get("total").unwrap_or(0),
            total_volume: row.try_get("volume").unwrap_or(0.0),
            avg_amount: row.try_get("avg_amount").unwrap_or(0.0),
            max_amount: row.try_get("max_amount").unwrap_or(0.0),
            avg_risk: row.try_get("avg_risk").unwrap_or(0.0),
            max_risk: row.try_get("max_risk").unwrap_or(0.0),
            unique_devices: row.try_get("devices").unwrap_or(0),
            unique_ips: row.try_get("ips").unwrap_or(0),
            unique_merchants: row.try_get("merchants").unwrap_or(0),
            flagged_count: row.try_get("flagged").unwrap_or(0),
        })
    }

    /// Rolling performance metrics for the last `hours`.
    pub async fn performance(&self, hours: i64) -> RiskMeshResult<PerformanceSummary> {
        let cutoff = Utc::now() - Duration::hours(hours);
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE risk_score >= $2) AS flagged,
                COALESCE(AVG(latency_ms), 0) AS avg_latency,
                COALESCE(AVG(propagation_depth), 0)::double precision AS avg_depth
            FROM transactions
            WHERE timestamp >= $1
            "#,
        )
        .bind(cutoff)
        .bind(FLAGGED_THRESHOLD)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Performance summary query failed");
            RiskMeshError::Database(e.to_string())
        })?;

        let total: i64 = row.try_get("total").unwrap_or(0);
        let flagged: i64 = row.try_get("flagged").unwrap_or(0);
        Ok(PerformanceSummary {
            total_transactions: total,
            flagged_count: flagged,
            flag_rate: if total > 0 { flagged as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: row.try_get("avg_latency").unwrap_or(0.0),
            avg_propagation_depth: row.try_get("avg_depth").unwrap_or(0.0),
        })
    }
}
