//! Prometheus text-format metrics
//!
//! Counters are kept per request source ("folder", "sonarr", ...). Gauges for
//! the queue and the *arr connections are read at render time from the
//! components that own them.

use crate::starr::AppStatus;
use crate::types::{ExtractionResult, QueueStats};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default, Clone)]
struct SourceMetrics {
    succeeded: u64,
    failed: u64,
    last_duration_secs: Option<f64>,
    bytes: u64,
    files: u64,
    archives: u64,
}

/// Extraction counters by source
#[derive(Debug)]
pub struct Metrics {
    started_at: DateTime<Utc>,
    sources: Mutex<BTreeMap<String, SourceMetrics>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Empty metrics; the process start time is taken now
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            sources: Mutex::new(BTreeMap::new()),
        }
    }

    /// When this instance was created
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Count one finished extraction
    ///
    /// Only successful runs contribute to duration, bytes, files and archives.
    pub fn record(&self, result: &ExtractionResult) {
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = sources.entry(result.source.clone()).or_default();

        if result.success {
            entry.succeeded += 1;
            entry.last_duration_secs = Some(result.elapsed.as_secs_f64());
            entry.bytes += result.total_bytes;
            entry.files += result.file_count as u64;
            entry.archives += result.archive_count as u64;
        } else {
            entry.failed += 1;
        }
    }

    /// Total extractions recorded for `source` as (succeeded, failed)
    pub fn totals(&self, source: &str) -> (u64, u64) {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .map(|m| (m.succeeded, m.failed))
            .unwrap_or_default()
    }

    /// Render everything in the Prometheus exposition format
    pub fn render(&self, queue: QueueStats, apps: &[(&str, AppStatus)]) -> String {
        let sources = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut out = String::new();

        header(&mut out, "unpackarr_extractions_total", "Total number of extractions", "counter");
        for (source, m) in &sources {
            for (status, count) in [("success", m.succeeded), ("failed", m.failed)] {
                if count > 0 {
                    writeln!(
                        out,
                        "unpackarr_extractions_total{{source=\"{}\",status=\"{}\"}} {}",
                        escape_label(source),
                        status,
                        count
                    )
                    .ok();
                }
            }
        }

        header(
            &mut out,
            "unpackarr_extraction_duration_seconds",
            "Last extraction duration",
            "gauge",
        );
        for (source, m) in &sources {
            if let Some(secs) = m.last_duration_secs {
                writeln!(
                    out,
                    "unpackarr_extraction_duration_seconds{{source=\"{}\"}} {:.2}",
                    escape_label(source),
                    secs
                )
                .ok();
            }
        }

        let counters: [(&str, &str, fn(&SourceMetrics) -> u64); 3] = [
            ("unpackarr_bytes_extracted_total", "Total bytes extracted", |m| m.bytes),
            ("unpackarr_files_extracted_total", "Total files extracted", |m| m.files),
            (
                "unpackarr_archives_processed_total",
                "Total archives processed",
                |m| m.archives,
            ),
        ];
        for (name, help, value) in counters {
            header(&mut out, name, help, "counter");
            for (source, m) in &sources {
                if m.succeeded > 0 {
                    writeln!(
                        out,
                        "{}{{source=\"{}\"}} {}",
                        name,
                        escape_label(source),
                        value(m)
                    )
                    .ok();
                }
            }
        }

        header(&mut out, "unpackarr_queue_size", "Current queue size by state", "gauge");
        writeln!(out, "unpackarr_queue_size{{state=\"waiting\"}} {}", queue.waiting).ok();
        writeln!(out, "unpackarr_queue_size{{state=\"extracting\"}} {}", queue.extracting).ok();

        if !apps.is_empty() {
            header(
                &mut out,
                "unpackarr_starr_connected",
                "Connection status (1=connected, 0=disconnected)",
                "gauge",
            );
            for (app, status) in apps {
                writeln!(
                    out,
                    "unpackarr_starr_connected{{app=\"{}\"}} {}",
                    escape_label(app),
                    u8::from(status.connected)
                )
                .ok();
            }

            header(
                &mut out,
                "unpackarr_starr_queue_items",
                "Number of items in starr queue",
                "gauge",
            );
            for (app, status) in apps {
                writeln!(
                    out,
                    "unpackarr_starr_queue_items{{app=\"{}\"}} {}",
                    escape_label(app),
                    status.queue_size
                )
                .ok();
            }
        }

        header(
            &mut out,
            "unpackarr_start_time_seconds",
            "Start time of the application",
            "gauge",
        );
        writeln!(out, "unpackarr_start_time_seconds {}", self.started_at.timestamp()).ok();

        out
    }
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    writeln!(out, "# HELP {} {}", name, help).ok();
    writeln!(out, "# TYPE {} {}", name, kind).ok();
}

/// Backslash, double quote and newline must be escaped inside label values
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
