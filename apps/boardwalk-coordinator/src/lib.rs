//! Boardwalk session coordinator: one authoritative actor per live session,
//! hybrid fast/backup persistence, and the axum HTTP + WebSocket surface.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod store;
pub mod tail;
pub mod telemetry;
pub mod websocket;

use crate::config::ServerConfig;
use crate::coordinator::SessionRegistry;
use crate::store::{KeyLayout, Stores};

pub struct AppState {
    pub registry: SessionRegistry,
    pub idle_timeout: Duration,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(
        registry: SessionRegistry,
        idle_timeout: Duration,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            registry,
            idle_timeout,
            metrics,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/debug/stats", get(handlers::stats_handler))
        .route("/api/sessions", post(handlers::create_session))
        .route(
            "/api/sessions/:id",
            get(handlers::get_session).put(handlers::put_session),
        )
        .route("/api/sessions/:id/debug", get(handlers::session_debug))
        .route("/ws/:session_id", get(websocket::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let fast = store::open(&config.fast_store_url, KeyLayout::Fast, None)
        .await
        .context("failed to open fast store")?;
    let backup = store::open(&config.backup_store_url, KeyLayout::Backup, config.backup_ttl)
        .await
        .context("failed to open backup store")?;
    let registry = SessionRegistry::new(Stores::new(fast, backup), config.coordinator.clone());
    let state = Arc::new(AppState::new(
        registry.clone(),
        config.idle_timeout,
        metrics,
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("boardwalk coordinator listening on {}", config.listen_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; flushing live sessions"
    );
    match tokio::time::timeout(config.shutdown_grace, registry.flush_all()).await {
        Ok(flushed) => info!(flushed, "backup flush complete"),
        Err(_) => warn!("shutdown grace elapsed before every session was flushed"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
