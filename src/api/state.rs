//! Shared state for the health/status handlers

use crate::config::WatchConfig;
use crate::metrics::Metrics;
use crate::queue::ExtractionQueue;
use crate::starr::StarrPoller;
use std::sync::Arc;
use std::time::Instant;

/// Everything the handlers read
///
/// Cloned for each request (cheap Arc clones).
#[derive(Clone)]
pub struct AppState {
    /// Extraction queue (stats, active extractions)
    pub queue: ExtractionQueue,
    /// *arr pollers, reported by connection state
    pub pollers: Arc<Vec<Arc<StarrPoller>>>,
    /// Extraction counters
    pub metrics: Arc<Metrics>,
    /// Folder watcher settings shown by /status
    pub watch: Arc<WatchConfig>,
    /// Process start, for uptime
    pub started: Instant,
}

impl AppState {
    /// Create state with the uptime clock starting now
    pub fn new(
        queue: ExtractionQueue,
        pollers: Vec<Arc<StarrPoller>>,
        metrics: Arc<Metrics>,
        watch: WatchConfig,
    ) -> Self {
        Self {
            queue,
            pollers: Arc::new(pollers),
            metrics,
            watch: Arc::new(watch),
            started: Instant::now(),
        }
    }
}
