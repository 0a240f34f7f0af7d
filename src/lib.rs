//! # unpackarr
//!
//! Unattended archive extraction for download folders.
//!
//! Two kinds of producers feed a single deduplicating queue:
//! - the **folder watcher**, which scans watched roots for subdirectories
//!   holding archives, and
//! - **\*arr pollers**, which read the download queues of Sonarr, Radarr,
//!   Lidarr and Readarr and pick up finished downloads awaiting import.
//!
//! A bounded pool extracts rar, 7z and zip archives (trying configured
//! passwords), a progress monitor samples output growth and flags stalls,
//! and every finished request produces exactly one [`ExtractionResult`]
//! that is logged, counted, optionally posted to a webhook and published as
//! an [`Event`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use unpackarr::{Config, Unpacker, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.watch.enabled = true;
//!
//!     let unpacker = Unpacker::new(config)?;
//!
//!     let mut events = unpacker.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     unpacker.start().await?;
//!     run_with_shutdown(unpacker).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Health/status HTTP server
pub mod api;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Archive detection and extraction
pub mod extraction;
/// Extraction worker pool
pub mod extractor;
/// Folder watching for directories with archives
pub mod folder_watcher;
/// "Already extracted" marker files
pub mod marker;
/// Prometheus metrics
pub mod metrics;
/// Extraction progress and stall monitoring
pub mod progress;
/// Admission-controlled extraction queue
pub mod queue;
/// *arr application pollers
pub mod starr;
/// Core types and events
pub mod types;
/// Service wiring
pub mod unpacker;
/// Utility functions
pub mod utils;
/// Webhook notifications
pub mod webhooks;

// Re-export commonly used types
pub use config::{
    Config, ExtractConfig, MIN_MONITOR_INTERVAL, MIN_POLL_INTERVAL, StarrAppConfig, WatchConfig,
    WebhookConfig,
};
pub use error::{Error, ExtractionError, Result};
pub use extractor::{ArchiveExtractor, ExtractionJob, ExtractionOutcome, Extractor, ExtractorUpdate};
pub use folder_watcher::{FolderWatcher, ScanSummary};
pub use progress::{ProgressManager, ProgressSnapshot};
pub use queue::{Admission, ExtractionQueue, ResultHandler};
pub use starr::{AppStatus, QueueItem, QueuePage, QueueSource, StarrApi, StarrApp, StarrPoller};
pub use types::{Event, ExtractionRequest, ExtractionResult, FOLDER_SOURCE, QueueStats};
pub use unpacker::Unpacker;

/// Run until a termination signal arrives, then shut down gracefully.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(unpacker: Unpacker) -> Result<()> {
    wait_for_signal().await;
    unpacker.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
