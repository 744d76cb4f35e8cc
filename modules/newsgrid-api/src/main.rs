use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use newsgrid_cache::CacheManager;
use newsgrid_common::Config;
use newsgrid_docstore::DocStore;
use newsgrid_store::SplitPool;

mod error;
mod rest;
mod tables;

pub struct AppState {
    pub pool: SplitPool,
    pub cache: CacheManager,
    pub docs: DocStore,
}

const POOL_HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const REPLICA_HEALTH_INTERVAL: Duration = Duration::from_secs(60);
const MATERIALIZE_WARMUP: Duration = Duration::from_secs(2 * 60);
const MATERIALIZE_INTERVAL: Duration = Duration::from_secs(30 * 60);
const MATERIALIZE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const CLEANUP_WINDOW: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("newsgrid=info".parse()?))
        .init();

    info!("Starting news aggregation server");
    let config = Config::from_env()?;
    config.log_redacted();

    // Startup order: pool → cache → document store (index creation) → HTTP.
    let pool = SplitPool::connect(
        &config.database_url,
        config.database_replica_url.as_deref(),
        config.pg_pool_size,
    )
    .await
    .map_err(|e| anyhow::anyhow!("Pool init failed: {e}"))?;

    if let Some(primary) = pool.primary() {
        newsgrid_store::migrate(primary)
            .await
            .map_err(|e| anyhow::anyhow!("Migration failed: {e}"))?;
        info!("Postgres migrations applied");
    } else {
        warn!("No primary endpoint survived construction — running read-only, skipping migrations");
    }

    let cache = CacheManager::connect(&config.redis_url)
        .await
        .map_err(|e| anyhow::anyhow!("Cache init failed: {e}"))?;

    let docs = DocStore::connect(&config.mongodb_uri, &config.text_index_language)
        .await
        .map_err(|e| anyhow::anyhow!("Document store init failed: {e}"))?;

    if env_flag("ENABLE_CHANGE_WATCHER") {
        docs.spawn_cache_invalidation_watcher();
    }

    let state = Arc::new(AppState { pool, cache, docs });
    spawn_tickers(state.clone());

    let app = rest::router(state.clone())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        );

    let addr = format!("{}:{}", config.http_host, config.http_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server drained");

    // Ordered teardown: document store, then cache (dropped with the
    // process — the managed connection has no explicit close), then pool.
    let cleanup = tokio::time::timeout(CLEANUP_WINDOW, async {
        state.docs.close().await;
        state.pool.close().await;
    })
    .await;
    match cleanup {
        Ok(()) => info!("Cleanup completed"),
        Err(_) => warn!("Cleanup window exceeded"),
    }

    info!("Server exited gracefully");
    Ok(())
}

fn spawn_tickers(state: Arc<AppState>) {
    // Relational pool health.
    let pool_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(POOL_HEALTH_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            pool_state.pool.health_check().await;
        }
    });

    // Document-store replica set health.
    let replica_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REPLICA_HEALTH_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match replica_state.docs.check_replica_set_health().await {
                Ok(health) if health.ok => {
                    info!(
                        members = health.members,
                        healthy = health.healthy_members,
                        "Document store replica set healthy"
                    );
                }
                Ok(health) => {
                    warn!(
                        members = health.members,
                        healthy = health.healthy_members,
                        "Document store replica set degraded"
                    );
                }
                Err(e) => warn!(error = %e, "Document store health check failed"),
            }
        }
    });

    // Periodic materialized-view refresh after a warm-up.
    let view_state = state;
    tokio::spawn(async move {
        tokio::time::sleep(MATERIALIZE_WARMUP).await;
        let mut ticker = tokio::time::interval(MATERIALIZE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            info!("Refreshing materialized views");
            match tokio::time::timeout(
                MATERIALIZE_TIMEOUT,
                view_state.docs.materialize_top_posts_view(),
            )
            .await
            {
                Ok(Ok(())) => info!("Materialized views refreshed"),
                Ok(Err(e)) => warn!(error = %e, "Failed to refresh materialized views"),
                Err(_) => warn!("Materialized view refresh timed out"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining connections");
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
