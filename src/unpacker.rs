//! Top-level service wiring
//!
//! [`Unpacker`] builds every component from a [`Config`]: the extractor and
//! its queue, the progress manager, the folder watcher, one poller per
//! configured *arr application, the result sinks and the health server.

use crate::api::{self, AppState};
use crate::config::Config;
use crate::error::Result;
use crate::extractor::ArchiveExtractor;
use crate::folder_watcher::FolderWatcher;
use crate::marker;
use crate::metrics::Metrics;
use crate::progress::ProgressManager;
use crate::queue::{ExtractionQueue, ResultHandler};
use crate::starr::{StarrApp, StarrPoller};
use crate::types::{Event, ExtractionResult};
use crate::utils::{format_bytes, format_duration};
use crate::webhooks::WebhookNotifier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for running extractions
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// The whole service
pub struct Unpacker {
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    queue: ExtractionQueue,
    watcher: Arc<FolderWatcher>,
    pollers: Vec<Arc<StarrPoller>>,
    metrics: Arc<Metrics>,
    webhook: Option<WebhookNotifier>,
    shutdown: CancellationToken,
    server: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Unpacker {
    /// Build every component; nothing runs until [`Unpacker::start`]
    pub fn new(mut config: Config) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(1000);
        let metrics = Arc::new(Metrics::new());

        let webhook = config
            .webhook
            .clone()
            .map(|cfg| WebhookNotifier::new(cfg, event_tx.clone()))
            .transpose()?;

        let progress = Arc::new(ProgressManager::new(
            config.extract.progress_interval,
            config.extract.stall_timeout,
            event_tx.clone(),
        ));

        let extractor = Arc::new(ArchiveExtractor::new(&config.extract));

        let queue = ExtractionQueue::new(
            extractor,
            progress,
            config.extract.passwords.clone(),
            event_tx.clone(),
            result_handler(metrics.clone(), webhook.clone(), event_tx.clone()),
        );

        let watcher = Arc::new(FolderWatcher::new(
            config.watch.clone(),
            config.extract.delete_original,
            queue.clone(),
            event_tx.clone(),
        ));

        let mut pollers = Vec::new();
        for (name, app_config) in config.enabled_apps() {
            let Some(app) = StarrApp::from_name(name) else {
                continue;
            };
            pollers.push(Arc::new(StarrPoller::with_api(
                app,
                app_config.clone(),
                queue.clone(),
            )?));
        }

        Ok(Self {
            config: Arc::new(config),
            event_tx,
            queue,
            watcher,
            pollers,
            metrics,
            webhook,
            shutdown: CancellationToken::new(),
            server: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Start the watcher, the pollers and the health server
    ///
    /// Calling it a second time does nothing.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(
            parallel = self.config.extract.parallel,
            delete_original = self.config.extract.delete_original,
            watcher = self.config.watch.enabled,
            apps = self.pollers.len(),
            webhook = self.webhook.is_some(),
            "starting unpackarr"
        );

        self.watcher.start().await?;

        for poller in &self.pollers {
            poller.start();
        }

        if self.config.health.enabled {
            let state = AppState::new(
                self.queue.clone(),
                self.pollers.clone(),
                self.metrics.clone(),
                self.config.watch.clone(),
            );
            let bind_address = self.config.health.bind_address;
            let shutdown = self.shutdown.clone();

            let handle = tokio::spawn(async move {
                if let Err(e) = api::start_api_server(state, bind_address, shutdown).await {
                    tracing::error!(error = %e, "health server failed");
                }
            });
            *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        Ok(())
    }

    /// Stop producers, refuse new work and wait briefly for running
    /// extractions
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("initiating graceful shutdown");

        for poller in &self.pollers {
            poller.stop().await;
        }
        self.watcher.stop().await;
        self.queue.stop();

        match tokio::time::timeout(SHUTDOWN_GRACE, self.wait_for_idle()).await {
            Ok(()) => tracing::info!("all extractions finished"),
            Err(_) => tracing::warn!(
                active = self.queue.active_count(),
                "timeout waiting for extractions, proceeding with shutdown"
            ),
        }
        self.queue.progress().cancel_all();

        self.shutdown.cancel();
        let server = self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = server
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "health server task failed");
        }

        self.event_tx.send(Event::Shutdown).ok();
        tracing::info!("shutdown complete");
        Ok(())
    }

    async fn wait_for_idle(&self) {
        while self.queue.stats().extracting > 0 {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The extraction queue, for direct submissions
    pub fn queue(&self) -> &ExtractionQueue {
        &self.queue
    }

    /// The folder watcher
    pub fn watcher(&self) -> &Arc<FolderWatcher> {
        &self.watcher
    }

    /// Configured *arr pollers
    pub fn pollers(&self) -> &[Arc<StarrPoller>] {
        &self.pollers
    }

    /// Extraction counters
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Webhook notifier, if one is configured
    pub fn webhook(&self) -> Option<&WebhookNotifier> {
        self.webhook.as_ref()
    }

    /// Effective (validated) configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Log, mark, count, notify and publish every finished extraction
fn result_handler(
    metrics: Arc<Metrics>,
    webhook: Option<WebhookNotifier>,
    event_tx: broadcast::Sender<Event>,
) -> ResultHandler {
    Arc::new(move |result: ExtractionResult| {
        if result.success {
            tracing::info!(
                name = %result.name,
                source = %result.source,
                elapsed = %format_duration(result.elapsed),
                archives = result.archive_count,
                files = result.file_count,
                size = %format_bytes(result.total_bytes),
                "extraction complete"
            );
        } else {
            tracing::warn!(
                name = %result.name,
                source = %result.source,
                error = result.error.as_deref().unwrap_or("unknown"),
                "extraction failed"
            );
        }

        if result.success && !result.delete_original {
            match marker::mark_directory(&result.path) {
                Ok(Some(path)) => {
                    tracing::debug!(marker = %path.display(), "marker written");
                    event_tx.send(Event::MarkerWritten { path }).ok();
                }
                Ok(None) => {
                    tracing::debug!(path = %result.path.display(), "no archive left to mark");
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %result.path.display(), "failed to write marker");
                }
            }
        }

        metrics.record(&result);

        if let Some(webhook) = &webhook {
            webhook.notify(&result);
        }

        let event = if result.success {
            Event::Extracted { result }
        } else {
            Event::ExtractionFailed { result }
        };
        event_tx.send(event).ok();
    })
}
