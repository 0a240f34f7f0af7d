//! *arr pollers filtering queue items into extraction requests

mod common;

use async_trait::async_trait;
use common::{FakeExtractor, Harness};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use common::wait_until;
use unpackarr::{
    Error, MIN_POLL_INTERVAL, QueueItem, QueuePage, QueueSource, Result, StarrApp, StarrAppConfig,
    StarrPoller,
};

struct ScriptedSource {
    name: &'static str,
    pages: Mutex<Vec<Result<QueuePage>>>,
}

impl ScriptedSource {
    fn new(name: &'static str, pages: Vec<Result<QueuePage>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            pages: Mutex::new(pages),
        })
    }
}

#[async_trait]
impl QueueSource for ScriptedSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_queue(&self) -> Result<QueuePage> {
        self.pages.lock().unwrap().remove(0)
    }
}

fn item(title: &str, path: &str, protocol: &str, status: &str, state: &str) -> QueueItem {
    QueueItem {
        id: 1,
        output_path: PathBuf::from(path),
        protocol: protocol.into(),
        status: status.into(),
        title: title.into(),
        size: 1024,
        download_id: format!("{title}-id"),
        tracked_download_state: state.into(),
    }
}

fn config(protocols: &[&str]) -> StarrAppConfig {
    StarrAppConfig {
        url: "http://localhost:8989".into(),
        api_key: "key".into(),
        paths: vec![PathBuf::from("/downloads")],
        protocols: protocols.iter().map(|p| p.to_string()).collect(),
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_secs(3600),
    }
}

fn page(records: Vec<QueueItem>) -> QueuePage {
    QueuePage {
        total_records: records.len(),
        records,
    }
}

#[tokio::test]
async fn only_ready_matching_items_are_submitted() {
    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor.clone(), Vec::new());

    let source = ScriptedSource::new(
        "sonarr",
        vec![Ok(page(vec![
            item("ready", "/downloads/ready", "torrent", "completed", "importPending"),
            item("elsewhere", "/media/elsewhere", "torrent", "completed", "importPending"),
            item("usenet", "/downloads/usenet", "usenet", "completed", "importPending"),
            item("importing", "/downloads/importing", "torrent", "completed", "importing"),
            item("downloading", "/downloads/dl", "torrent", "downloading", "downloading"),
            item("no-path", "", "torrent", "completed", "importPending"),
        ]))],
    );
    let poller = StarrPoller::new(StarrApp::Sonarr, config(&["torrent"]), source, h.queue.clone());

    assert_eq!(poller.poll_once().await.unwrap(), 1);
    assert_eq!(extractor.job_count(), 1);

    let job = extractor.job(0);
    assert_eq!(job.name, "ready");
    assert_eq!(job.path, PathBuf::from("/downloads/ready"));
    assert!(!job.delete_original);

    let status = poller.status();
    assert!(status.connected);
    assert_eq!(status.queue_size, 6);
}

#[tokio::test]
async fn lidarr_does_not_wait_for_import_pending() {
    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor.clone(), Vec::new());

    let source = ScriptedSource::new(
        "lidarr",
        vec![Ok(page(vec![item(
            "album",
            "/downloads/album",
            "usenet",
            "completed",
            "downloading",
        )]))],
    );
    let poller = StarrPoller::new(StarrApp::Lidarr, config(&[]), source, h.queue.clone());

    assert_eq!(poller.poll_once().await.unwrap(), 1);
}

#[tokio::test]
async fn repeated_polls_do_not_resubmit_active_paths() {
    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor.clone(), Vec::new());

    let ready = || {
        Ok(page(vec![item(
            "movie",
            "/downloads/movie",
            "usenet",
            "completed",
            "importPending",
        )]))
    };
    let source = ScriptedSource::new("radarr", vec![ready(), ready()]);
    let poller = StarrPoller::new(StarrApp::Radarr, config(&[]), source, h.queue.clone());

    assert_eq!(poller.poll_once().await.unwrap(), 1);
    assert_eq!(poller.poll_once().await.unwrap(), 0);
    assert_eq!(extractor.job_count(), 1);
}

#[tokio::test]
async fn failed_poll_marks_app_disconnected() {
    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor, Vec::new());

    let source = ScriptedSource::new(
        "readarr",
        vec![
            Ok(page(Vec::new())),
            Err(Error::Starr {
                app: "Readarr".into(),
                operation: "get queue".into(),
                reason: "HTTP 503 Service Unavailable".into(),
            }),
        ],
    );
    let poller = StarrPoller::new(StarrApp::Readarr, config(&[]), source, h.queue.clone());

    poller.poll_once().await.unwrap();
    assert!(poller.status().connected);

    assert!(poller.poll_once().await.is_err());
    let status = poller.status();
    assert!(!status.connected);
    assert!(status.last_error.unwrap().contains("503"));
}

#[tokio::test]
async fn zero_poll_interval_falls_back_to_default() {
    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor.clone(), Vec::new());

    let source = ScriptedSource::new(
        "sonarr",
        vec![Ok(page(vec![item(
            "ready",
            "/downloads/ready",
            "usenet",
            "completed",
            "importPending",
        )]))],
    );
    let mut cfg = config(&[]);
    cfg.poll_interval = Duration::ZERO;
    let poller = Arc::new(StarrPoller::new(StarrApp::Sonarr, cfg, source, h.queue.clone()));
    assert_eq!(poller.poll_interval(), Duration::from_secs(120));

    poller.start();
    assert!(wait_until(Duration::from_secs(5), || extractor.job_count() == 1).await);
    poller.stop().await;
    assert!(poller.status().connected);

    let mut cfg = config(&[]);
    cfg.poll_interval = Duration::from_millis(1);
    let poller = StarrPoller::new(
        StarrApp::Radarr,
        cfg,
        ScriptedSource::new("radarr", Vec::new()),
        h.queue.clone(),
    );
    assert_eq!(poller.poll_interval(), MIN_POLL_INTERVAL);
}
