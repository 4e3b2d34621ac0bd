//! # Metrics Endpoint
//!
//! Prometheus exposition in the standard text format.

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};

use crate::metrics::gather_metrics;

async fn metrics_handler() -> impl IntoResponse {
    (StatusCode::OK, gather_metrics())
}

/// Create metrics routes
pub fn metrics_routes() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_endpoint_is_ok() {
        let app = metrics_routes();

        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
