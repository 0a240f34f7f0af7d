use super::*;
use crate::config::{StarrAppConfig, WatchConfig};
use crate::error::Error;
use crate::extractor::{ExtractionJob, Extractor};
use crate::metrics::Metrics;
use crate::progress::ProgressManager;
use crate::queue::ExtractionQueue;
use crate::starr::{QueuePage, QueueSource, StarrApp, StarrPoller};
use crate::types::{ExtractionRequest, ExtractionResult, FOLDER_SOURCE};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt;

#[derive(Default)]
struct HoldingExtractor {
    jobs: Mutex<Vec<ExtractionJob>>,
}

impl Extractor for HoldingExtractor {
    fn submit(&self, job: ExtractionJob) -> crate::Result<usize> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job);
        Ok(jobs.len())
    }

    fn stop(&self) {}
}

struct FixedSource {
    reachable: bool,
}

#[async_trait]
impl QueueSource for FixedSource {
    fn name(&self) -> &str {
        "sonarr"
    }

    async fn fetch_queue(&self) -> crate::Result<QueuePage> {
        if self.reachable {
            Ok(QueuePage {
                total_records: 4,
                records: Vec::new(),
            })
        } else {
            Err(Error::Starr {
                app: "Sonarr".into(),
                operation: "get queue".into(),
                reason: "connection refused".into(),
            })
        }
    }
}

fn starr_config() -> StarrAppConfig {
    StarrAppConfig {
        url: "http://sonarr:8989".into(),
        api_key: String::new(),
        paths: vec![PathBuf::from("/downloads")],
        protocols: Vec::new(),
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_secs(60),
    }
}

fn test_queue() -> ExtractionQueue {
    let (tx, _) = broadcast::channel(16);
    let progress = Arc::new(ProgressManager::new(
        Duration::from_secs(30),
        Duration::from_secs(300),
        tx.clone(),
    ));
    ExtractionQueue::new(
        Arc::new(HoldingExtractor::default()),
        progress,
        Vec::new(),
        tx,
        Arc::new(|_result: ExtractionResult| {}),
    )
}

async fn state_with_poller(reachable: bool) -> AppState {
    let queue = test_queue();
    let poller = Arc::new(StarrPoller::new(
        StarrApp::Sonarr,
        starr_config(),
        Arc::new(FixedSource { reachable }),
        queue.clone(),
    ));
    poller.poll_once().await.ok();

    AppState::new(
        queue,
        vec![poller],
        Arc::new(Metrics::new()),
        WatchConfig::default(),
    )
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, axum::body::Bytes) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn ping_and_health() {
    let app = create_router(state_with_poller(true).await);

    let (status, body) = get_json(app.clone(), "/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get_json(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
}

#[tokio::test]
async fn ready_when_all_apps_connected() {
    let app = create_router(state_with_poller(true).await);

    let (status, body) = get_json(app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn not_ready_lists_disconnected_apps() {
    let app = create_router(state_with_poller(false).await);

    let (status, body) = get_json(app, "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
    assert_eq!(body["reasons"][0], "sonarr disconnected");
}

#[tokio::test]
async fn status_reports_queue_and_apps() {
    let state = state_with_poller(true).await;
    state
        .queue
        .add(ExtractionRequest::new(
            "movie",
            "/downloads/movie",
            FOLDER_SOURCE,
            true,
        ))
        .unwrap();

    let (status, body) = get_json(create_router(state), "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue"]["waiting"], 1);
    assert_eq!(body["queue"]["extracting"], 0);
    assert_eq!(body["apps"]["sonarr"]["connected"], true);
    assert_eq!(body["apps"]["sonarr"]["queue_items"], 4);
    assert_eq!(body["folder_watcher"]["enabled"], false);
    assert!(body["extractions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn metrics_are_prometheus_text() {
    let app = create_router(state_with_poller(false).await);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; version=0.0.4"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("unpackarr_queue_size{state=\"waiting\"} 0"));
    assert!(text.contains("unpackarr_starr_connected{app=\"sonarr\"} 0"));
}

#[tokio::test]
async fn server_stops_on_cancel() {
    let state = state_with_poller(true).await;
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(start_api_server(
        state,
        "127.0.0.1:0".parse().unwrap(),
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
