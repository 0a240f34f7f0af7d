//! Route handlers

use crate::api::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde_json::{Map, Value, json};

/// GET /ping
pub async fn ping() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /health - the process is up
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /ready - 503 while any *arr poller is disconnected
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let reasons: Vec<String> = state
        .pollers
        .iter()
        .filter(|p| !p.status().connected)
        .map(|p| format!("{} disconnected", p.app().name()))
        .collect();

    if reasons.is_empty() {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reasons": reasons })),
        )
    }
}

/// GET /status - queue, running extractions, watcher and app state
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.queue.stats();

    let mut apps = Map::new();
    for poller in state.pollers.iter() {
        let status = poller.status();
        apps.insert(
            poller.app().name().to_string(),
            json!({
                "connected": status.connected,
                "queue_items": status.queue_size,
                "last_error": status.last_error,
            }),
        );
    }

    Json(json!({
        "queue": {
            "waiting": stats.waiting,
            "extracting": stats.extracting,
        },
        "extractions": state.queue.progress().snapshot(),
        "folder_watcher": {
            "enabled": state.watch.enabled,
            "paths": state.watch.paths,
        },
        "apps": Value::Object(apps),
        "uptime_seconds": state.started.elapsed().as_secs(),
    }))
}

/// GET /metrics - Prometheus text format
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let apps: Vec<_> = state
        .pollers
        .iter()
        .map(|p| (p.app().name(), p.status()))
        .collect();
    let body = state.metrics.render(state.queue.stats(), &apps);

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
