//! The extraction service the queue submits jobs to
//!
//! [`Extractor`] is the seam between admission control and the code that
//! actually decompresses archives. A job reports back over its own channel:
//! one [`ExtractorUpdate::Started`] followed by exactly one
//! [`ExtractorUpdate::Done`]. [`ArchiveExtractor`] is the built-in
//! implementation backed by the [`extraction`](crate::extraction) module.

use crate::config::ExtractConfig;
use crate::error::{Error, Result};
use crate::extraction::{self, PasswordList};
use crate::utils;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

/// A unit of work handed to an [`Extractor`]
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    /// Display name
    pub name: String,
    /// Directory to search for archives
    pub path: PathBuf,
    /// Passwords to try, in order (configured defaults first)
    pub passwords: Vec<String>,
    /// Remove the archive files after a successful extraction
    pub delete_original: bool,
    /// Where lifecycle updates for this job are delivered
    pub updates: mpsc::UnboundedSender<ExtractorUpdate>,
}

/// Lifecycle notification for one job
#[derive(Debug, Clone)]
pub enum ExtractorUpdate {
    /// Work has begun on the listed archives
    Started {
        /// First-volume archives that will be processed
        archives: Vec<PathBuf>,
        /// Directory the extracted files are written into
        output_dir: PathBuf,
    },
    /// Terminal notification, sent exactly once per accepted job
    Done(ExtractionOutcome),
}

/// Terminal summary of a job
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// When the extractor began working on the job
    pub started_at: DateTime<Utc>,
    /// Wall-clock time spent on the job
    pub elapsed: Duration,
    /// Archives that were processed
    pub archives: Vec<PathBuf>,
    /// Files written by the extraction
    pub new_files: Vec<PathBuf>,
    /// Combined size of `new_files`
    pub total_bytes: u64,
    /// Failure description, `None` on success
    pub error: Option<String>,
}

impl ExtractionOutcome {
    /// Whether the job finished without error
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Asynchronous extraction engine
///
/// `submit` returns as soon as the job is accepted; progress arrives on
/// `job.updates`. An accepted job always receives exactly one `Done`.
pub trait Extractor: Send + Sync {
    /// Accept a job, returning the number of jobs now pending in the extractor
    fn submit(&self, job: ExtractionJob) -> Result<usize>;

    /// Stop accepting new jobs. Jobs already accepted run to completion.
    fn stop(&self);
}

struct ExtractorState {
    parallel: usize,
    try_empty_password: bool,
    /// Limits how many jobs decompress at the same time
    concurrent_limit: Arc<Semaphore>,
    /// Flag to indicate whether new jobs are accepted (set to false on stop)
    accepting_new: AtomicBool,
    /// Accepted jobs that have not sent `Done` yet
    pending: AtomicUsize,
}

/// Built-in extractor for RAR, 7z and ZIP archives
#[derive(Clone)]
pub struct ArchiveExtractor {
    state: Arc<ExtractorState>,
}

impl ArchiveExtractor {
    /// Create an extractor that runs at most `config.parallel` jobs at a time
    pub fn new(config: &ExtractConfig) -> Self {
        let parallel = config.parallel.max(1);
        Self {
            state: Arc::new(ExtractorState {
                parallel,
                try_empty_password: config.try_empty_password,
                concurrent_limit: Arc::new(Semaphore::new(parallel)),
                accepting_new: AtomicBool::new(true),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    /// Jobs accepted but not finished
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Maximum number of concurrent jobs
    pub fn parallel(&self) -> usize {
        self.state.parallel
    }
}

impl Extractor for ArchiveExtractor {
    fn submit(&self, job: ExtractionJob) -> Result<usize> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        if !job.path.is_dir() {
            return Err(Error::Extractor(format!(
                "{} is not a directory",
                job.path.display()
            )));
        }

        let depth = self.state.pending.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(path = %job.path.display(), depth, "extraction job accepted");

        let state = self.state.clone();
        tokio::spawn(async move {
            run_job(&state, job).await;
            state.pending.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(depth)
    }

    fn stop(&self) {
        self.state.accepting_new.store(false, Ordering::SeqCst);
        info!(
            pending = self.pending(),
            "extractor stopped accepting new jobs"
        );
    }
}

async fn run_job(state: &ExtractorState, job: ExtractionJob) {
    let _permit = match state.concurrent_limit.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            let _ = job.updates.send(ExtractorUpdate::Done(ExtractionOutcome {
                started_at: Utc::now(),
                elapsed: Duration::ZERO,
                archives: Vec::new(),
                new_files: Vec::new(),
                total_bytes: 0,
                error: Some(format!("extractor unavailable: {}", e)),
            }));
            return;
        }
    };

    let started_at = Utc::now();
    let start = Instant::now();

    let search_dir = job.path.clone();
    let archives = match tokio::task::spawn_blocking(move || {
        extraction::find_archives(&search_dir)
    })
    .await
    {
        Ok(archives) => archives,
        Err(e) => {
            warn!(error = %e, path = %job.path.display(), "archive search task failed");
            Vec::new()
        }
    };

    let _ = job.updates.send(ExtractorUpdate::Started {
        archives: archives.clone(),
        output_dir: job.path.clone(),
    });

    let passwords = PasswordList::from_combined(&job.passwords, state.try_empty_password);
    let mut new_files = Vec::new();
    let mut error = None;

    if archives.is_empty() {
        error = Some(format!("no archives found in {}", job.path.display()));
    }

    for archive in &archives {
        let dest = archive.parent().unwrap_or(job.path.as_path());
        match extraction::extract_archive(archive, dest, &passwords).await {
            Ok(files) => new_files.extend(files),
            Err(e) => {
                warn!(error = %e, archive = %archive.display(), "archive extraction failed");
                error = Some(e.to_string());
                break;
            }
        }
    }

    if error.is_none() && job.delete_original {
        remove_originals(&archives);
    }

    let total_bytes = utils::files_size(new_files.iter().map(|p| p.as_path()));

    let outcome = ExtractionOutcome {
        started_at,
        elapsed: start.elapsed(),
        archives,
        new_files,
        total_bytes,
        error,
    };

    if job.updates.send(ExtractorUpdate::Done(outcome)).is_err() {
        debug!(path = %job.path.display(), "job receiver dropped before completion");
    }
}

fn remove_originals(archives: &[PathBuf]) {
    for archive in archives {
        for volume in extraction::archive_volumes(archive) {
            match std::fs::remove_file(&volume) {
                Ok(()) => debug!(path = %volume.display(), "removed original archive"),
                Err(e) => warn!(
                    error = %e,
                    path = %volume.display(),
                    "failed to remove original archive"
                ),
            }
        }
    }
}
