//! Core types for unpackarr

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Source label used for folder-watcher submissions
pub const FOLDER_SOURCE: &str = "folder";

/// A request to extract every archive found under `path`
///
/// Built by a producer (the folder watcher or an *arr poller) and consumed by
/// [`ExtractionQueue::add`](crate::queue::ExtractionQueue::add). The path is
/// the deduplication key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    /// Display name (folder name or *arr title)
    pub name: String,
    /// Directory to extract
    pub path: PathBuf,
    /// Producer label: "folder", "sonarr", "radarr", ...
    pub source: String,
    /// Remove the archives after a successful extraction
    pub delete_original: bool,
    /// Request-specific passwords, tried after the configured ones
    pub passwords: Vec<String>,
}

impl ExtractionRequest {
    /// Create a request with no extra passwords
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        source: impl Into<String>,
        delete_original: bool,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            source: source.into(),
            delete_original,
            passwords: Vec::new(),
        }
    }
}

/// Outcome of one admitted request, produced exactly once per request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Display name from the request
    pub name: String,
    /// Producer label from the request
    pub source: String,
    /// Extracted directory
    pub path: PathBuf,
    /// Whether archives were (to be) removed
    pub delete_original: bool,
    /// When the extractor started working on the request
    pub started_at: DateTime<Utc>,
    /// Wall-clock extraction time
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// Number of archives processed
    pub archive_count: usize,
    /// Number of files written
    pub file_count: usize,
    /// Bytes written
    pub total_bytes: u64,
    /// True when every archive extracted cleanly
    pub success: bool,
    /// Failure description when `success` is false
    pub error: Option<String>,
}

/// Queue counters
///
/// `waiting + extracting` equals the number of active paths whenever no
/// submission or notification is mid-flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Admitted but not yet started
    pub waiting: usize,
    /// Started and not yet finished
    pub extracting: usize,
}

/// Event emitted during the extraction lifecycle
///
/// Subscribe via [`Unpacker::subscribe`](crate::Unpacker::subscribe) or pass
/// your own broadcast sender to the individual components.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A request was admitted to the queue
    Queued {
        /// Display name
        name: String,
        /// Directory to extract
        path: PathBuf,
        /// Producer label
        source: String,
    },

    /// The extractor began working on a request
    Started {
        /// Display name
        name: String,
        /// Directory being extracted
        path: PathBuf,
        /// Number of archives found
        archives: usize,
        /// Sum of archive sizes on disk (0 = unknown)
        expected_bytes: u64,
    },

    /// Periodic liveness observation for a running extraction
    Progress {
        /// Directory being extracted
        path: PathBuf,
        /// Bytes written since extraction started
        bytes: u64,
        /// Sum of archive sizes on disk (0 = unknown)
        expected_bytes: u64,
        /// `bytes / expected_bytes * 100` when the expectation is known
        percent: Option<f64>,
        /// Write speed since the previous sample
        speed_bps: u64,
        /// Seconds since extraction started
        elapsed_secs: u64,
    },

    /// No output growth for at least the stall timeout
    Stalled {
        /// Display name
        name: String,
        /// Directory being extracted
        path: PathBuf,
        /// Seconds without output growth
        idle_secs: u64,
    },

    /// Extraction finished successfully
    Extracted {
        /// The final result
        result: ExtractionResult,
    },

    /// Extraction finished with an error
    ExtractionFailed {
        /// The final result
        result: ExtractionResult,
    },

    /// A "do not re-extract" marker was written next to an archive
    MarkerWritten {
        /// Marker file path
        path: PathBuf,
    },

    /// An orphaned marker was removed
    MarkerRemoved {
        /// Marker file path
        path: PathBuf,
    },

    /// Webhook delivery failed
    WebhookFailed {
        /// Webhook URL
        url: String,
        /// Failure description
        error: String,
    },

    /// Shutdown completed
    Shutdown,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
