//! Hand-driven collaborators for exercising the queue

use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use unpackarr::{
    Error, Event, ExtractionJob, ExtractionOutcome, ExtractionQueue, ExtractionResult, Extractor,
    ExtractorUpdate, ProgressManager, Result,
};

/// Extractor that holds every job until the test drives it
#[derive(Default)]
pub struct FakeExtractor {
    jobs: Mutex<Vec<ExtractionJob>>,
    pub reject: AtomicBool,
    pub stopped: AtomicBool,
}

impl FakeExtractor {
    /// Number of jobs submitted so far
    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Job `index` in submission order
    pub fn job(&self, index: usize) -> ExtractionJob {
        self.jobs.lock().unwrap()[index].clone()
    }

    /// Most recent job for `path`
    pub fn job_for(&self, path: &str) -> ExtractionJob {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|job| job.path == PathBuf::from(path))
            .cloned()
            .unwrap()
    }

    /// Report that a job began
    pub fn start(&self, job: &ExtractionJob) {
        job.updates
            .send(ExtractorUpdate::Started {
                archives: vec![job.path.join("a.rar")],
                output_dir: job.path.clone(),
            })
            .unwrap();
    }

    /// Report that a job finished, with an optional error
    pub fn finish(&self, job: &ExtractionJob, error: Option<&str>) {
        job.updates
            .send(ExtractorUpdate::Done(ExtractionOutcome {
                started_at: Utc::now(),
                elapsed: Duration::from_millis(10),
                archives: vec![job.path.join("a.rar")],
                new_files: vec![job.path.join("a.mkv")],
                total_bytes: 100,
                error: error.map(str::to_string),
            }))
            .unwrap();
    }
}

impl Extractor for FakeExtractor {
    fn submit(&self, job: ExtractionJob) -> Result<usize> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::Extractor("rejected by test".into()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job);
        Ok(jobs.len())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// A queue in front of `extractor` plus a record of delivered results
pub struct Harness {
    pub queue: ExtractionQueue,
    pub progress: Arc<ProgressManager>,
    pub results: Arc<Mutex<Vec<ExtractionResult>>>,
    pub events: broadcast::Sender<Event>,
}

impl Harness {
    /// Build a queue with long sampling periods so trackers stay quiet
    pub fn new(extractor: Arc<dyn Extractor>, default_passwords: Vec<String>) -> Self {
        let (events, _) = broadcast::channel(256);
        let progress = Arc::new(ProgressManager::new(
            Duration::from_secs(30),
            Duration::from_secs(300),
            events.clone(),
        ));
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();

        let queue = ExtractionQueue::new(
            extractor,
            progress.clone(),
            default_passwords,
            events.clone(),
            Arc::new(move |result: ExtractionResult| sink.lock().unwrap().push(result)),
        );

        Self {
            queue,
            progress,
            results,
            events,
        }
    }

    /// Results delivered so far
    pub fn result_count(&self) -> usize {
        self.results.lock().unwrap().len()
    }
}
