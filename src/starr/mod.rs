//! Pollers for media-management ("*arr") applications
//!
//! Each configured application is polled for its download queue. Items that
//! finished downloading, live under a configured path and use an accepted
//! protocol are submitted to the extraction queue with the originals kept,
//! since the application still has to import them.

mod api;

pub use api::{PAGE_SIZE, StarrApi};

use crate::config::{self, MIN_POLL_INTERVAL, StarrAppConfig};
use crate::error::Result;
use crate::queue::ExtractionQueue;
use crate::types::ExtractionRequest;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Supported applications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StarrApp {
    /// TV series
    Sonarr,
    /// Movies
    Radarr,
    /// Music
    Lidarr,
    /// Books
    Readarr,
}

impl StarrApp {
    /// Every supported application
    pub const ALL: [StarrApp; 4] = [
        StarrApp::Sonarr,
        StarrApp::Radarr,
        StarrApp::Lidarr,
        StarrApp::Readarr,
    ];

    /// Lowercase name, also used as the request source label
    pub fn name(self) -> &'static str {
        match self {
            StarrApp::Sonarr => "sonarr",
            StarrApp::Radarr => "radarr",
            StarrApp::Lidarr => "lidarr",
            StarrApp::Readarr => "readarr",
        }
    }

    /// Capitalised name for messages
    pub fn display_name(self) -> &'static str {
        match self {
            StarrApp::Sonarr => "Sonarr",
            StarrApp::Radarr => "Radarr",
            StarrApp::Lidarr => "Lidarr",
            StarrApp::Readarr => "Readarr",
        }
    }

    /// Look up an application by its lowercase name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|app| app.name() == name)
    }

    /// API version segment used in URLs
    pub fn api_version(self) -> &'static str {
        match self {
            StarrApp::Sonarr | StarrApp::Radarr => "v3",
            StarrApp::Lidarr | StarrApp::Readarr => "v1",
        }
    }

    /// Whether a queue item is ready to be extracted
    ///
    /// Lidarr reports finished downloads as `completed` only; the others
    /// also wait for `importPending`.
    pub fn is_ready(self, item: &QueueItem) -> bool {
        if item.status != "completed" {
            return false;
        }
        match self {
            StarrApp::Lidarr => true,
            _ => item.tracked_download_state == "importPending",
        }
    }
}

/// One entry of an application's download queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    /// Queue record id
    pub id: i64,
    /// Where the download client put the files (empty if unknown)
    pub output_path: PathBuf,
    /// "usenet" or "torrent"
    pub protocol: String,
    /// Download status, e.g. "completed"
    pub status: String,
    /// Release title
    pub title: String,
    /// Size in bytes
    pub size: u64,
    /// Download client id
    pub download_id: String,
    /// Import state, e.g. "importPending"
    pub tracked_download_state: String,
}

/// First page of an application's queue
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueuePage {
    /// Total number of records the application holds
    pub total_records: usize,
    /// Records on this page
    pub records: Vec<QueueItem>,
}

/// Anything that can list a download queue
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Source label for submitted requests
    fn name(&self) -> &str;

    /// Fetch the current queue
    async fn fetch_queue(&self) -> Result<QueuePage>;
}

/// Connection state of one poller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppStatus {
    /// The last poll succeeded
    pub connected: bool,
    /// Total records reported by the last successful poll
    pub queue_size: usize,
    /// Error from the last failed poll
    pub last_error: Option<String>,
}

/// Periodically polls one application and submits ready items
pub struct StarrPoller {
    app: StarrApp,
    config: StarrAppConfig,
    source: Arc<dyn QueueSource>,
    queue: ExtractionQueue,
    status: Mutex<AppStatus>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StarrPoller {
    /// Create a poller reading from `source`
    pub fn new(
        app: StarrApp,
        mut config: StarrAppConfig,
        source: Arc<dyn QueueSource>,
        queue: ExtractionQueue,
    ) -> Self {
        config.poll_interval = config::clamp_interval(
            &format!("{}.poll_interval", app.name()),
            config.poll_interval,
            config::default_poll_interval(),
            MIN_POLL_INTERVAL,
        );

        Self {
            app,
            config,
            source,
            queue,
            status: Mutex::new(AppStatus::default()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Create a poller backed by the application's HTTP API
    pub fn with_api(app: StarrApp, config: StarrAppConfig, queue: ExtractionQueue) -> Result<Self> {
        let api = StarrApi::new(app, &config)?;
        Ok(Self::new(app, config, Arc::new(api), queue))
    }

    /// Which application this poller talks to
    pub fn app(&self) -> StarrApp {
        self.app
    }

    /// Base URL of the application
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Effective poll period
    pub fn poll_interval(&self) -> std::time::Duration {
        self.config.poll_interval
    }

    /// Current connection state
    pub fn status(&self) -> AppStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start polling in the background (first poll happens immediately)
    pub fn start(self: &Arc<Self>) {
        let poller = self.clone();
        let handle = tokio::spawn(async move { poller.run().await });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(
            app = self.app.name(),
            url = %self.config.url,
            interval = ?self.config.poll_interval,
            "started polling"
        );
    }

    /// Stop polling and wait for the task to exit
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(app = self.app.name(), error = %e, "poller task failed");
        }
        debug!(app = self.app.name(), "poller stopped");
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(app = self.app.name(), error = %e, "poll failed");
                    }
                }
            }
        }
    }

    /// Fetch the queue once and submit every ready item
    ///
    /// Returns the number of newly admitted requests. Updates the
    /// connection status either way.
    pub async fn poll_once(&self) -> Result<usize> {
        let page = match self.source.fetch_queue().await {
            Ok(page) => page,
            Err(e) => {
                let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
                status.connected = false;
                status.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            status.connected = true;
            status.queue_size = page.total_records;
            status.last_error = None;
        }

        let mut admitted = 0;
        for item in page.records {
            if !self.should_process(&item) || !self.app.is_ready(&item) {
                continue;
            }

            let request = ExtractionRequest::new(
                item.title.clone(),
                item.output_path.clone(),
                self.source.name(),
                false,
            );

            match self.queue.add(request) {
                Ok(admission) if admission.is_admitted() => {
                    info!(app = self.app.name(), name = %item.title, "queued extraction");
                    admitted += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(
                    app = self.app.name(),
                    name = %item.title,
                    error = %e,
                    "failed to queue extraction"
                ),
            }
        }

        Ok(admitted)
    }

    fn should_process(&self, item: &QueueItem) -> bool {
        !item.output_path.as_os_str().is_empty()
            && self.config.has_path(&item.output_path)
            && self.config.has_protocol(&item.protocol)
    }
}
