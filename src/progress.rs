//! Liveness monitoring for running extractions
//!
//! While an extraction runs, a sampler task periodically measures how many
//! bytes have appeared in its output directory. Growth is reported as
//! progress; no growth for the stall timeout raises one stall warning per
//! episode. Stalls are observational only and never cancel the extraction.

use crate::config::{self, MIN_MONITOR_INTERVAL};
use crate::types::Event;
use crate::utils::{self, dir_size, format_bytes, format_duration};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one sample tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Bytes written since tracking started
    pub bytes: u64,
    /// Write speed since the previous sample, bytes per second
    pub speed_bps: u64,
    /// `bytes / expected_bytes * 100`, `None` when the expectation is unknown
    pub percent: Option<f64>,
    /// Time since tracking started
    pub elapsed: Duration,
    /// Output grew since the previous sample
    pub grew: bool,
    /// Output has not changed for at least the stall timeout
    pub stalled: bool,
    /// This sample opened a new stall episode (warning should be emitted)
    pub stall_warning: bool,
    /// Time since the output last changed
    pub idle: Duration,
}

/// Per-extraction sampling state
///
/// The tracker itself does no I/O: [`observe`](Self::observe) is fed the
/// current output size and a timestamp, which keeps the stall rules
/// deterministic.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    name: String,
    path: PathBuf,
    output_dir: PathBuf,
    expected_files: usize,
    expected_bytes: u64,
    /// Output size when tracking started, subtracted from every sample
    baseline: u64,
    started_at: Instant,
    last_sample_at: Instant,
    last_activity_at: Instant,
    last_bytes: u64,
    stall_warned: bool,
}

impl ProgressTracker {
    /// Create a tracker whose clock starts at `now`
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        expected_files: usize,
        expected_bytes: u64,
        baseline: u64,
        now: Instant,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            output_dir: output_dir.into(),
            expected_files,
            expected_bytes,
            baseline,
            started_at: now,
            last_sample_at: now,
            last_activity_at: now,
            last_bytes: 0,
            stall_warned: false,
        }
    }

    /// Fold one measurement of the output directory into the tracker
    ///
    /// `output_size` is the raw directory size; the starting baseline is
    /// subtracted here.
    pub fn observe(&mut self, output_size: u64, now: Instant, stall_timeout: Duration) -> Sample {
        let bytes = output_size.saturating_sub(self.baseline);
        let since_last = now.saturating_duration_since(self.last_sample_at);

        let grew = bytes > self.last_bytes;
        let speed_bps = if grew && since_last.as_secs_f64() > 0.0 {
            ((bytes - self.last_bytes) as f64 / since_last.as_secs_f64()) as u64
        } else {
            0
        };

        if bytes != self.last_bytes {
            self.last_activity_at = now;
        }
        if grew {
            self.stall_warned = false;
        }

        let idle = now.saturating_duration_since(self.last_activity_at);
        let stalled = bytes == self.last_bytes && idle >= stall_timeout;
        let stall_warning = stalled && !self.stall_warned;
        if stall_warning {
            self.stall_warned = true;
        }

        self.last_bytes = bytes;
        self.last_sample_at = now;

        Sample {
            bytes,
            speed_bps,
            percent: self.percent(bytes),
            elapsed: now.saturating_duration_since(self.started_at),
            grew,
            stalled,
            stall_warning,
            idle,
        }
    }

    fn percent(&self, bytes: u64) -> Option<f64> {
        (self.expected_bytes > 0).then(|| bytes as f64 / self.expected_bytes as f64 * 100.0)
    }

    /// Whether a stall warning is outstanding (cleared by the next growth)
    pub fn is_stalled(&self) -> bool {
        self.stall_warned
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source path this tracker belongs to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory being measured
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Bytes observed at the last sample
    pub fn bytes(&self) -> u64 {
        self.last_bytes
    }

    /// Expected total, 0 if unknown
    pub fn expected_bytes(&self) -> u64 {
        self.expected_bytes
    }

    /// Number of archives being extracted
    pub fn expected_files(&self) -> usize {
        self.expected_files
    }

    /// Time since tracking started
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Point-in-time view of one tracked extraction
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    /// Display name
    pub name: String,
    /// Source path
    pub path: PathBuf,
    /// Seconds since tracking started
    pub elapsed_secs: u64,
    /// Bytes observed at the last sample
    pub bytes: u64,
    /// Expected total, 0 if unknown
    pub expected_bytes: u64,
    /// Stall warning outstanding
    pub stalled: bool,
}

struct TrackerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    tracker: Arc<Mutex<ProgressTracker>>,
}

/// Keyed collection of running trackers, one per source path
pub struct ProgressManager {
    trackers: Mutex<HashMap<PathBuf, TrackerHandle>>,
    progress_interval: Duration,
    stall_timeout: Duration,
    event_tx: broadcast::Sender<Event>,
}

impl ProgressManager {
    /// Create a manager sampling every `progress_interval`
    ///
    /// Zero periods fall back to the defaults and anything shorter than
    /// [`MIN_MONITOR_INTERVAL`] is raised to it.
    pub fn new(
        progress_interval: Duration,
        stall_timeout: Duration,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            trackers: Mutex::new(HashMap::new()),
            progress_interval: config::clamp_interval(
                "progress_interval",
                progress_interval,
                config::default_progress_interval(),
                MIN_MONITOR_INTERVAL,
            ),
            stall_timeout: config::clamp_interval(
                "stall_timeout",
                stall_timeout,
                config::default_stall_timeout(),
                MIN_MONITOR_INTERVAL,
            ),
            event_tx,
        }
    }

    /// Effective sampling period
    pub fn progress_interval(&self) -> Duration {
        self.progress_interval
    }

    /// Effective stall timeout
    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, TrackerHandle>> {
        self.trackers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin sampling `output_dir` for the extraction of `path`
    ///
    /// Whatever is already in `output_dir` is treated as the baseline and
    /// not counted as progress. Starting a tracker for a path that already
    /// has one replaces it; the old sampler has exited by the time this
    /// returns.
    pub async fn start_tracking(
        &self,
        name: &str,
        path: &Path,
        output_dir: &Path,
        expected_files: usize,
        expected_bytes: u64,
    ) {
        let dir = output_dir.to_path_buf();
        let baseline = tokio::task::spawn_blocking(move || dir_size(&dir))
            .await
            .unwrap_or(0);

        let tracker = Arc::new(Mutex::new(ProgressTracker::new(
            name,
            path,
            output_dir,
            expected_files,
            expected_bytes,
            baseline,
            Instant::now(),
        )));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sampler(
            tracker.clone(),
            cancel.clone(),
            self.progress_interval,
            self.stall_timeout,
            self.event_tx.clone(),
        ));

        info!(
            name,
            path = %path.display(),
            archives = expected_files,
            compressed = %format_bytes(expected_bytes),
            "starting extraction"
        );

        let previous = self.lock().insert(
            path.to_path_buf(),
            TrackerHandle {
                cancel,
                task,
                tracker,
            },
        );

        if let Some(previous) = previous {
            warn!(path = %path.display(), "replacing existing progress tracker");
            previous.cancel.cancel();
            if let Err(e) = previous.task.await {
                warn!(error = %e, path = %path.display(), "replaced progress sampler task failed");
            }
        }
    }

    /// Stop sampling `path` and log a final summary
    ///
    /// Does not return until the sampler task has exited. Returns `false`
    /// when no tracker was registered for `path`.
    pub async fn stop_tracking(
        &self,
        path: &Path,
        success: bool,
        final_bytes: u64,
        final_files: usize,
        error: Option<&str>,
    ) -> bool {
        let Some(handle) = self.lock().remove(path) else {
            debug!(path = %path.display(), "no progress tracker to stop");
            return false;
        };

        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!(error = %e, path = %path.display(), "progress sampler task failed");
        }

        let tracker = handle
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let elapsed = tracker.elapsed();
        let throughput = if elapsed.as_secs_f64() > 0.0 {
            (final_bytes as f64 / elapsed.as_secs_f64()) as u64
        } else {
            0
        };

        if success {
            info!(
                name = tracker.name(),
                path = %path.display(),
                files = final_files,
                size = %format_bytes(final_bytes),
                elapsed = %format_duration(elapsed),
                speed = %format!("{}/s", format_bytes(throughput)),
                "extraction finished"
            );
        } else {
            warn!(
                name = tracker.name(),
                path = %path.display(),
                elapsed = %format_duration(elapsed),
                error = error.unwrap_or("unknown error"),
                "extraction failed"
            );
        }

        true
    }

    /// Number of running trackers
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether `path` currently has an outstanding stall warning
    pub fn is_stalled(&self, path: &Path) -> bool {
        self.lock().get(path).is_some_and(|handle| {
            handle
                .tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_stalled()
        })
    }

    /// Snapshot of every running tracker, sorted by path
    pub fn snapshot(&self) -> Vec<ProgressSnapshot> {
        let mut snapshots: Vec<ProgressSnapshot> = self
            .lock()
            .values()
            .map(|handle| {
                let tracker = handle.tracker.lock().unwrap_or_else(PoisonError::into_inner);
                ProgressSnapshot {
                    name: tracker.name().to_string(),
                    path: tracker.path().to_path_buf(),
                    elapsed_secs: tracker.elapsed().as_secs(),
                    bytes: tracker.bytes(),
                    expected_bytes: tracker.expected_bytes(),
                    stalled: tracker.is_stalled(),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.path.cmp(&b.path));
        snapshots
    }

    /// Cancel every sampler (used on shutdown)
    pub fn cancel_all(&self) {
        for handle in self.lock().values() {
            handle.cancel.cancel();
        }
    }
}

async fn run_sampler(
    tracker: Arc<Mutex<ProgressTracker>>,
    cancel: CancellationToken,
    interval: Duration,
    stall_timeout: Duration,
    event_tx: broadcast::Sender<Event>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let output_dir = tracker
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .output_dir()
        .to_path_buf();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let dir = output_dir.clone();
                let size = match tokio::task::spawn_blocking(move || utils::dir_size(&dir)).await {
                    Ok(size) => size,
                    Err(e) => {
                        warn!(error = %e, dir = %output_dir.display(), "failed to measure output directory");
                        continue;
                    }
                };

                let (sample, name, path, expected_bytes) = {
                    let mut tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
                    let sample = tracker.observe(size, Instant::now(), stall_timeout);
                    (
                        sample,
                        tracker.name().to_string(),
                        tracker.path().to_path_buf(),
                        tracker.expected_bytes(),
                    )
                };

                report(&sample, &name, &path, expected_bytes, &event_tx);
            }
        }
    }

    debug!(dir = %output_dir.display(), "progress sampler stopped");
}

fn report(
    sample: &Sample,
    name: &str,
    path: &Path,
    expected_bytes: u64,
    event_tx: &broadcast::Sender<Event>,
) {
    if sample.grew {
        info!(
            name,
            extracted = %format_bytes(sample.bytes),
            compressed = %format_bytes(expected_bytes),
            percent = %sample.percent.map(|p| format!("{:.1}%", p)).unwrap_or_default(),
            running = %format_duration(sample.elapsed),
            speed = %format!("{}/s", format_bytes(sample.speed_bps)),
            "extraction progress"
        );
        event_tx
            .send(Event::Progress {
                path: path.to_path_buf(),
                bytes: sample.bytes,
                expected_bytes,
                percent: sample.percent,
                speed_bps: sample.speed_bps,
                elapsed_secs: sample.elapsed.as_secs(),
            })
            .ok();
    }

    if sample.stall_warning {
        warn!(
            name,
            path = %path.display(),
            idle = %format_duration(sample.idle),
            "extraction appears stalled"
        );
        event_tx
            .send(Event::Stalled {
                name: name.to_string(),
                path: path.to_path_buf(),
                idle_secs: sample.idle.as_secs(),
            })
            .ok();
    }
}
