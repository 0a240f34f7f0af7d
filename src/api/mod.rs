//! Health and status HTTP server
//!
//! A small read-only surface for container orchestration and monitoring.

use crate::error::{Error, Result};
use axum::{Router, routing::get};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod handlers;
pub mod state;

pub use state::AppState;

/// Build the router
///
/// # Routes
///
/// - `GET /ping` - liveness probe
/// - `GET /health` - liveness with version
/// - `GET /ready` - readiness; 503 with reasons while an *arr app is unreachable
/// - `GET /status` - queue counters, running extractions, watcher and app state
/// - `GET /metrics` - Prometheus metrics
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/status", get(handlers::status))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `bind_address` and serve until `shutdown` is cancelled
pub async fn start_api_server(
    state: AppState,
    bind_address: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = create_router(state);

    let listener = TcpListener::bind(bind_address).await.map_err(Error::Io)?;

    tracing::info!(
        address = %listener.local_addr().unwrap_or(bind_address),
        "health server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::ApiServer(e.to_string()))?;

    tracing::info!("health server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
