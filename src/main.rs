//! RiskMesh server entrypoint.
//!
//! Wires the engine to its collaborators from environment configuration,
//! serves the API, and drains the sink worker pool on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riskmesh::api::{api_routes, health_routes, metrics_routes, ApiState};
use riskmesh::cache::{cache_cleanup_task, CacheConfig, RiskCache};
use riskmesh::sink::{FraudAnalytics, SinkConfig, TransactionSink};
use riskmesh::{AppConfig, AuthGate, RiskEngine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    info!(version = riskmesh::VERSION, bind = %config.bind, "Starting RiskMesh");

    // Durable sink: scoring stays available without it.
    let (sink, analytics) = match &config.database_url {
        Some(url) => match TransactionSink::connect(url, SinkConfig::default()).await {
            Ok(sink) => {
                let analytics = FraudAnalytics::connect(url).await.ok();
                (sink, analytics)
            }
            Err(e) => {
                warn!(error = %e, "Transaction store unavailable, scoring without persistence");
                (TransactionSink::disabled(), None)
            }
        },
        None => {
            warn!("DATABASE_URL not set, scoring without persistence");
            (TransactionSink::disabled(), None)
        }
    };

    let cache_config = CacheConfig { redis_url: config.redis_url.clone(), ..Default::default() };
    #[cfg(feature = "redis-cache")]
    let cache = match RiskCache::new_with_redis(cache_config.clone()).await {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!(error = %e, "Redis unavailable, using in-memory cache only");
            Arc::new(RiskCache::new_memory(cache_config))
        }
    };
    #[cfg(not(feature = "redis-cache"))]
    let cache = Arc::new(RiskCache::new_memory(cache_config));

    let engine = Arc::new(
        RiskEngine::builder(config.engine.clone())
            .cache(cache.clone())
            .sink(sink.clone())
            .build(),
    );
    let auth = Arc::new(AuthGate::from_env());

    tokio::spawn(cache_cleanup_task(cache.clone()));
    {
        let auth = auth.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                auth.limiter().cleanup_stale(Duration::from_secs(600));
            }
        });
    }

    // Out-of-band graph GC, enabled by RISKMESH_PRUNE_HORIZON_DAYS.
    if let Some(horizon_days) = std::env::var("RISKMESH_PRUNE_HORIZON_DAYS")
        .ok()
        .and_then(|raw| raw.parse::<i64>().ok())
    {
        let graph = engine.graph().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let removed = graph.prune(chrono::Duration::days(horizon_days));
                if removed > 0 {
                    info!(removed, horizon_days, "Pruned stale graph nodes");
                }
            }
        });
    }

    let state = Arc::new(ApiState {
        graph: engine.graph().clone(),
        cache,
        engine,
        auth,
        analytics,
    });

    let app = health_routes()
        .merge(metrics_routes())
        .merge(api_routes(state))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!(addr = %config.bind, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    sink.flush(Duration::from_secs(5)).await;
    info!("RiskMesh stopped");
    Ok(())
}
