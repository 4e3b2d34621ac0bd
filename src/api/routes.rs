//! # API Routes
//!
//! Ingest and read endpoints. Every route here resolves the `x-api-key`
//! header to a principal and passes the rate limiter before doing any work;
//! health and metrics live in their own routers and skip both.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::auth::{AuthGate, Principal};
use crate::cache::RiskCache;
use crate::graph::GraphStore;
use crate::metrics::RATE_LIMITED_TOTAL;
use crate::risk::RiskEngine;
use crate::sink::FraudAnalytics;
use crate::types::{EventRequest, RiskMeshError};

/// Shared state behind every API route
pub struct ApiState {
    pub engine: Arc<RiskEngine>,
    pub graph: Arc<GraphStore>,
    pub cache: Arc<RiskCache>,
    pub auth: Arc<AuthGate>,
    /// Absent when no transaction store is configured
    pub analytics: Option<FraudAnalytics>,
}

/// Create the API router
pub fn api_routes(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/event", post(ingest_event))
        .route("/api/stats", get(get_stats))
        .route("/api/cache/stats", get(get_cache_stats))
        .route("/api/analytics/risk-distribution", get(get_risk_distribution))
        .route("/api/analytics/top-users", get(get_top_users))
        .route("/api/analytics/users/:user_id", get(get_user_profile))
        .route("/api/analytics/performance", get(get_performance))
        .with_state(state)
}

/// Client-visible error with its HTTP status
struct ApiError {
    status: StatusCode,
    body: serde_json::Value,
}

impl ApiError {
    fn analytics_unavailable() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: json!({ "error": "analytics unavailable: no transaction store configured" }),
        }
    }
}

impl From<RiskMeshError> for ApiError {
    fn from(err: RiskMeshError) -> Self {
        let (status, body) = match &err {
            RiskMeshError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, json!({ "error": msg }))
            }
            RiskMeshError::UnknownPrincipal => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "missing or unknown API key" }),
            ),
            RiskMeshError::RateLimited { retry_after_secs, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "rate limit exceeded", "retry_after_secs": retry_after_secs }),
            ),
            RiskMeshError::Cache(msg)
            | RiskMeshError::Sink(msg)
            | RiskMeshError::Database(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg }))
            }
            RiskMeshError::Invariant(msg) => {
                error!(error = msg, "Internal invariant violation surfaced to API");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
        };
        Self { status, body }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = self.body;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("code".to_string(), json!(self.status.as_u16()));
        }
        (self.status, Json(body)).into_response()
    }
}

fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if api_key.is_empty() {
        return Err(ApiError::from(RiskMeshError::UnknownPrincipal));
    }
    state.auth.authorize(api_key).map_err(|err| {
        if matches!(err, RiskMeshError::RateLimited { .. }) {
            RATE_LIMITED_TOTAL.inc();
        } else {
            warn!(api_key, "Rejected request with unknown API key");
        }
        ApiError::from(err)
    })
}

// ============================================================================
// Handlers
// ============================================================================

async fn ingest_event(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(event): Json<EventRequest>,
) -> Result<Response, ApiError> {
    let principal = authorize(&state, &headers)?;
    let response = state.engine.process_event(&principal.name, event).await?;
    Ok(Json(response).into_response())
}

#[derive(Serialize)]
struct StatsResponse {
    graph_nodes: usize,
    graph_edges: usize,
    nodes_by_kind: std::collections::BTreeMap<String, usize>,
    timestamp: chrono::DateTime<Utc>,
}

async fn get_stats(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    let snapshot = state.graph.snapshot();
    Ok(Json(StatsResponse {
        graph_nodes: snapshot.nodes,
        graph_edges: snapshot.edges,
        nodes_by_kind: snapshot.nodes_by_kind,
        timestamp: Utc::now(),
    })
    .into_response())
}

async fn get_cache_stats(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(json!({
        "cache": state.cache.stats(),
        "rate_limiter": state.auth.limiter().stats(),
    }))
    .into_response())
}

#[derive(Deserialize)]
struct WindowParams {
    #[serde(default = "default_hours")]
    hours: i64,
}

fn default_hours() -> i64 {
    24
}

async fn get_risk_distribution(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(params): Query<WindowParams>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    let analytics = state.analytics.as_ref().ok_or_else(ApiError::analytics_unavailable)?;
    let distribution = analytics.risk_distribution(params.hours).await?;
    Ok(Json(distribution).into_response())
}

#[derive(Deserialize)]
struct TopUsersParams {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    10
}

async fn get_top_users(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(params): Query<TopUsersParams>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    let analytics = state.analytics.as_ref().ok_or_else(ApiError::analytics_unavailable)?;
    let users = analytics.top_risky_users(params.limit).await?;
    Ok(Json(users).into_response())
}

#[derive(Deserialize)]
struct ProfileParams {
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    30
}

async fn get_user_profile(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(params): Query<ProfileParams>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    let analytics = state.analytics.as_ref().ok_or_else(ApiError::analytics_unavailable)?;
    let profile = analytics.user_profile(&user_id, params.days).await?;
    Ok(Json(profile).into_response())
}

async fn get_performance(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(params): Query<WindowParams>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    let analytics = state.analytics.as_ref().ok_or_else(ApiError::analytics_unavailable)?;
    let summary = analytics.performance(params.hours).await?;
    Ok(Json(summary).into_response())
}
