//! Error types for unpackarr
//!
//! Extraction failures are deliberately absent from the public API surface: a
//! failed decompression is an expected outcome and travels through
//! [`ExtractionResult`](crate::types::ExtractionResult). The variants here
//! cover submission, configuration, filesystem and collaborator errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for unpackarr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for unpackarr
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "watch.paths")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request rejected before reaching the extractor (empty path, etc.)
    #[error("invalid extraction request: {0}")]
    InvalidRequest(String),

    /// The extractor refused the submission
    #[error("extractor rejected job: {0}")]
    Extractor(String),

    /// Shutdown in progress - not accepting new extractions
    #[error("shutdown in progress: not accepting new extractions")]
    ShuttingDown,

    /// Archive extraction error (raised inside the extractor only)
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Marker file could not be written or removed
    #[error("marker error at {path}: {reason}")]
    Marker {
        /// Marker file path
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// Media-management ("*arr") API error
    #[error("{app} {operation}: {reason}")]
    Starr {
        /// Application name (sonarr, radarr, ...)
        app: String,
        /// Operation that failed (e.g., "get queue")
        operation: String,
        /// Underlying reason
        reason: String,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Health server error
    #[error("API server error: {0}")]
    ApiServer(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Archive-level extraction errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Archive extraction failed
    #[error("extraction failed for {archive}: {reason}")]
    Failed {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// Wrong password for encrypted archive
    #[error("wrong password for encrypted archive {archive}")]
    WrongPassword {
        /// The encrypted archive that could not be opened
        archive: PathBuf,
    },

    /// All passwords failed for archive extraction
    #[error("all {count} passwords failed for archive {archive}")]
    AllPasswordsFailed {
        /// The encrypted archive that could not be opened
        archive: PathBuf,
        /// The number of passwords that were tried
        count: usize,
    },

    /// No passwords available to try
    #[error("no passwords available for archive {archive}")]
    NoPasswordsAvailable {
        /// The archive that could not be attempted
        archive: PathBuf,
    },

    /// Unknown archive format
    #[error("unsupported archive type: {0}")]
    Unsupported(PathBuf),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}
