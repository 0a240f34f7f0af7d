//! Folder watching for directories that contain archives
//!
//! The watcher polls each configured root on an interval. Every immediate
//! subdirectory holding at least one archive is submitted to the
//! [`ExtractionQueue`]; the queue's own deduplication keeps repeated scans
//! from double-submitting a directory that is still in flight.
//!
//! When originals are kept (`delete_original == false`) a successful
//! extraction leaves a marker next to the first archive, and directories
//! with a marker are skipped. A second loop removes markers whose archive
//! has since disappeared. When originals are deleted, markers are never
//! consulted: the archive itself is gone after a successful run.

use crate::config::{self, MIN_POLL_INTERVAL, WatchConfig};
use crate::error::Result;
use crate::extraction;
use crate::marker;
use crate::queue::ExtractionQueue;
use crate::types::{Event, ExtractionRequest, FOLDER_SOURCE};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a single scan pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Directories newly admitted to the queue
    pub submitted: usize,
    /// Directories skipped because they carry a marker
    pub marked: usize,
    /// Directories already queued or extracting
    pub duplicates: usize,
    /// Directories the queue refused
    pub rejected: usize,
}

/// Directory found by a scan that holds archives
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    name: String,
    path: PathBuf,
    has_marker: bool,
}

/// Polls watched folders and submits archive directories for extraction
pub struct FolderWatcher {
    config: WatchConfig,
    delete_original: bool,
    queue: ExtractionQueue,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FolderWatcher {
    /// Create a watcher for `config.paths`
    ///
    /// `delete_original` is applied to every submitted request and decides
    /// whether markers are consulted.
    pub fn new(
        mut config: WatchConfig,
        delete_original: bool,
        queue: ExtractionQueue,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        config.poll_interval = config::clamp_interval(
            "watch.poll_interval",
            config.poll_interval,
            config::default_poll_interval(),
            MIN_POLL_INTERVAL,
        );
        config.marker_cleanup_interval = config::clamp_interval(
            "watch.marker_cleanup_interval",
            config.marker_cleanup_interval,
            config::default_marker_cleanup_interval(),
            MIN_POLL_INTERVAL,
        );

        Self {
            config,
            delete_original,
            queue,
            event_tx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Watched root directories
    pub fn paths(&self) -> &[PathBuf] {
        &self.config.paths
    }

    /// Effective scan period
    pub fn poll_interval(&self) -> std::time::Duration {
        self.config.poll_interval
    }

    /// Start the scan loop and, when originals are kept, the marker cleanup loop
    ///
    /// Marker cleanup runs once before the first scan. Does nothing when the
    /// watcher is disabled.
    pub async fn start(self: &std::sync::Arc<Self>) -> Result<()> {
        if !self.config.enabled {
            debug!("folder watcher disabled");
            return Ok(());
        }

        if !self.delete_original {
            let removed = self.clean_orphaned_markers().await;
            debug!(removed, "startup marker cleanup finished");
        }

        let mut tasks = Vec::new();

        let watcher = self.clone();
        tasks.push(tokio::spawn(async move {
            watcher.run_scan_loop().await;
        }));

        if !self.delete_original {
            let watcher = self.clone();
            tasks.push(tokio::spawn(async move {
                watcher.run_cleanup_loop().await;
            }));
        }

        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend(tasks);

        info!(
            paths = self.config.paths.len(),
            interval = ?self.config.poll_interval,
            delete_original = self.delete_original,
            "folder watcher started"
        );
        Ok(())
    }

    /// Stop both loops and wait for them to exit
    ///
    /// A filesystem walk in progress finishes before its loop observes the
    /// stop.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "folder watcher task failed");
            }
        }
        debug!("folder watcher stopped");
    }

    async fn run_scan_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let summary = self.scan_once().await;
                    if summary.submitted > 0 {
                        info!(submitted = summary.submitted, "folder scan queued extractions");
                    }
                }
            }
        }
    }

    async fn run_cleanup_loop(&self) {
        let period = self.config.marker_cleanup_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.clean_orphaned_markers().await;
                }
            }
        }
    }

    /// Scan every root once and submit new candidates
    pub async fn scan_once(&self) -> ScanSummary {
        let roots = self.config.paths.clone();
        let check_markers = !self.delete_original;

        let candidates = match tokio::task::spawn_blocking(move || {
            roots
                .iter()
                .flat_map(|root| find_candidates(root, check_markers))
                .collect::<Vec<_>>()
        })
        .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "folder scan task failed");
                return ScanSummary::default();
            }
        };

        let mut summary = ScanSummary::default();

        for candidate in candidates {
            if candidate.has_marker {
                debug!(path = %candidate.path.display(), "marker present, skipping");
                summary.marked += 1;
                continue;
            }

            let request = ExtractionRequest::new(
                candidate.name,
                candidate.path.clone(),
                FOLDER_SOURCE,
                self.delete_original,
            );

            match self.queue.add(request) {
                Ok(admission) if admission.is_admitted() => summary.submitted += 1,
                Ok(_) => summary.duplicates += 1,
                Err(e) => {
                    warn!(error = %e, path = %candidate.path.display(), "failed to queue directory");
                    summary.rejected += 1;
                }
            }
        }

        summary
    }

    /// Remove markers whose archive is gone, under every root
    ///
    /// Returns the number of markers removed.
    pub async fn clean_orphaned_markers(&self) -> usize {
        let roots = self.config.paths.clone();
        let event_tx = self.event_tx.clone();

        let removed = tokio::task::spawn_blocking(move || {
            roots
                .iter()
                .map(|root| marker::clean_orphaned_markers(root, &event_tx))
                .sum::<usize>()
        })
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "marker cleanup task failed");
            0
        });

        if removed > 0 {
            info!(removed, "removed orphaned markers");
        }
        removed
    }
}

/// Immediate subdirectories of `root` that contain archives
fn find_candidates(root: &Path, check_markers: bool) -> Vec<Candidate> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, root = %root.display(), "failed to read watch folder");
            return Vec::new();
        }
    };

    let mut candidates = Vec::new();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, root = %root.display(), "skipping unreadable entry");
                continue;
            }
        };

        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        if extraction::find_archives(&path).is_empty() {
            continue;
        }

        let has_marker = check_markers && marker::has_marker(&path);
        candidates.push(Candidate {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            has_marker,
        });
    }

    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    candidates
}
