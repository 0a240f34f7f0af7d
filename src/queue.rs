//! Admission-controlled extraction queue
//!
//! [`ExtractionQueue::add`] is the single entry point for every producer.
//! A path is admitted at most once until its extraction finishes: the
//! membership check and insertion happen under one lock, so concurrent
//! producers racing on the same directory cannot both get through.
//!
//! Each admitted request gets a driver task that follows the extractor's
//! `Started` / `Done` notifications, keeps the counters and progress
//! tracking in step, and finally hands an [`ExtractionResult`] to the
//! registered handler.

use crate::error::{Error, Result};
use crate::extraction;
use crate::extractor::{ExtractionJob, ExtractionOutcome, Extractor, ExtractorUpdate};
use crate::progress::ProgressManager;
use crate::types::{Event, ExtractionRequest, ExtractionResult, QueueStats};
use crate::utils;
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Receives every terminal [`ExtractionResult`]
///
/// Called from the queue's driver task with no lock held. Slow work
/// (network calls) should be spawned rather than done inline.
pub type ResultHandler = Arc<dyn Fn(ExtractionResult) + Send + Sync>;

/// Outcome of [`ExtractionQueue::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was handed to the extractor
    Queued {
        /// Jobs pending in the extractor after this one was accepted
        queue_depth: usize,
    },
    /// The path is already queued or extracting; nothing was submitted
    Duplicate {
        /// Paths currently active in the queue
        queue_depth: usize,
    },
}

impl Admission {
    /// Whether the request was admitted
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Queued { .. })
    }

    /// Queue depth reported with the admission decision
    pub fn queue_depth(&self) -> usize {
        match self {
            Admission::Queued { queue_depth } | Admission::Duplicate { queue_depth } => {
                *queue_depth
            }
        }
    }
}

#[derive(Default)]
struct QueueState {
    /// Paths queued or extracting
    active: HashSet<PathBuf>,
    stats: QueueStats,
}

struct QueueInner {
    extractor: Arc<dyn Extractor>,
    progress: Arc<ProgressManager>,
    default_passwords: Vec<String>,
    on_result: ResultHandler,
    event_tx: broadcast::Sender<Event>,
    state: Mutex<QueueState>,
    accepting_new: AtomicBool,
}

/// Deduplicating front end to an [`Extractor`]
#[derive(Clone)]
pub struct ExtractionQueue {
    inner: Arc<QueueInner>,
}

impl ExtractionQueue {
    /// Create a queue in front of `extractor`
    ///
    /// `default_passwords` are tried before any request-specific ones.
    pub fn new(
        extractor: Arc<dyn Extractor>,
        progress: Arc<ProgressManager>,
        default_passwords: Vec<String>,
        event_tx: broadcast::Sender<Event>,
        on_result: ResultHandler,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                extractor,
                progress,
                default_passwords,
                on_result,
                event_tx,
                state: Mutex::new(QueueState::default()),
                accepting_new: AtomicBool::new(true),
            }),
        }
    }

    /// Submit a request
    ///
    /// Returns [`Admission::Duplicate`] (not an error) when the path is
    /// already active. An extractor rejection is returned as an error and
    /// leaves no trace in the queue.
    pub fn add(&self, request: ExtractionRequest) -> Result<Admission> {
        if request.path.as_os_str().is_empty() {
            return Err(Error::InvalidRequest("path is empty".into()));
        }
        if !self.inner.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        {
            let mut state = self.inner.lock();
            if state.active.contains(&request.path) {
                let queue_depth = state.active.len();
                debug!(
                    name = %request.name,
                    path = %request.path.display(),
                    source = %request.source,
                    "already queued or extracting, skipping"
                );
                return Ok(Admission::Duplicate { queue_depth });
            }
            state.active.insert(request.path.clone());
            state.stats.waiting += 1;
        }

        let (updates, rx) = mpsc::unbounded_channel();
        let mut passwords = self.inner.default_passwords.clone();
        passwords.extend(request.passwords.iter().cloned());

        let job = ExtractionJob {
            name: request.name.clone(),
            path: request.path.clone(),
            passwords,
            delete_original: request.delete_original,
            updates,
        };

        match self.inner.extractor.submit(job) {
            Ok(queue_depth) => {
                info!(
                    name = %request.name,
                    path = %request.path.display(),
                    source = %request.source,
                    queue_depth,
                    "queued extraction"
                );
                self.inner
                    .event_tx
                    .send(Event::Queued {
                        name: request.name.clone(),
                        path: request.path.clone(),
                        source: request.source.clone(),
                    })
                    .ok();

                tokio::spawn(drive(self.inner.clone(), request, rx));
                Ok(Admission::Queued { queue_depth })
            }
            Err(e) => {
                {
                    let mut state = self.inner.lock();
                    state.active.remove(&request.path);
                    state.stats.waiting = state.stats.waiting.saturating_sub(1);
                }
                warn!(
                    error = %e,
                    path = %request.path.display(),
                    "extractor rejected request"
                );
                Err(e)
            }
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }

    /// Whether `path` is queued or extracting
    pub fn is_active(&self, path: &Path) -> bool {
        self.inner.lock().active.contains(path)
    }

    /// Number of queued or extracting paths
    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Stop admitting requests and tell the extractor to stop
    ///
    /// Extractions already accepted are left to finish.
    pub fn stop(&self) {
        self.inner.accepting_new.store(false, Ordering::SeqCst);
        self.inner.extractor.stop();
        let stats = self.stats();
        info!(
            waiting = stats.waiting,
            extracting = stats.extracting,
            "extraction queue stopped"
        );
    }

    /// Progress manager driven by this queue
    pub fn progress(&self) -> &Arc<ProgressManager> {
        &self.inner.progress
    }
}

impl QueueInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn on_start(&self, request: &ExtractionRequest, archives: &[PathBuf], output_dir: &Path) {
        {
            let mut state = self.lock();
            state.stats.waiting = state.stats.waiting.saturating_sub(1);
            state.stats.extracting += 1;
        }

        let expected_bytes = expected_size(archives.to_vec()).await;

        self.event_tx
            .send(Event::Started {
                name: request.name.clone(),
                path: request.path.clone(),
                archives: archives.len(),
                expected_bytes,
            })
            .ok();

        self.progress
            .start_tracking(
                &request.name,
                &request.path,
                output_dir,
                archives.len(),
                expected_bytes,
            )
            .await;
    }

    async fn on_done(&self, request: &ExtractionRequest, started: bool, outcome: ExtractionOutcome) {
        // Tracker goes first so a re-admitted path cannot have its new
        // tracker removed by this stop.
        self.progress
            .stop_tracking(
                &request.path,
                outcome.is_success(),
                outcome.total_bytes,
                outcome.new_files.len(),
                outcome.error.as_deref(),
            )
            .await;

        {
            let mut state = self.lock();
            if started {
                state.stats.extracting = state.stats.extracting.saturating_sub(1);
            } else {
                state.stats.waiting = state.stats.waiting.saturating_sub(1);
            }
            state.active.remove(&request.path);
        }

        let result = ExtractionResult {
            name: request.name.clone(),
            source: request.source.clone(),
            path: request.path.clone(),
            delete_original: request.delete_original,
            started_at: outcome.started_at,
            elapsed: outcome.elapsed,
            archive_count: outcome.archives.len(),
            file_count: outcome.new_files.len(),
            total_bytes: outcome.total_bytes,
            success: outcome.error.is_none(),
            error: outcome.error,
        };

        (self.on_result)(result);
    }
}

/// Follow one job's notifications until its terminal update
async fn drive(
    inner: Arc<QueueInner>,
    request: ExtractionRequest,
    mut rx: mpsc::UnboundedReceiver<ExtractorUpdate>,
) {
    let mut started = false;

    let outcome = loop {
        match rx.recv().await {
            Some(ExtractorUpdate::Started {
                archives,
                output_dir,
            }) => {
                if started {
                    warn!(path = %request.path.display(), "ignoring repeated start notification");
                    continue;
                }
                started = true;
                inner.on_start(&request, &archives, &output_dir).await;
            }
            Some(ExtractorUpdate::Done(outcome)) => break outcome,
            None => {
                warn!(
                    path = %request.path.display(),
                    "extractor dropped job without a result"
                );
                break ExtractionOutcome {
                    started_at: Utc::now(),
                    elapsed: Duration::ZERO,
                    archives: Vec::new(),
                    new_files: Vec::new(),
                    total_bytes: 0,
                    error: Some("extractor dropped the job without a result".into()),
                };
            }
        }
    };

    inner.on_done(&request, started, outcome).await;
}

/// Combined on-disk size of every volume of `archives`
async fn expected_size(archives: Vec<PathBuf>) -> u64 {
    tokio::task::spawn_blocking(move || {
        let volumes: Vec<PathBuf> = archives
            .iter()
            .flat_map(|archive| extraction::archive_volumes(archive))
            .collect();
        utils::files_size(volumes.iter().map(|p| p.as_path()))
    })
    .await
    .unwrap_or(0)
}
