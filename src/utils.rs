//! Utility functions for sizes, durations and directory accounting

use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

/// Format a byte count with binary units
///
/// # Examples
///
/// ```
/// use unpackarr::utils::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KiB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const PREFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < PREFIXES.len() - 1 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    format!("{:.2} {}iB", bytes as f64 / div as f64, PREFIXES[exp])
}

/// Format a duration as `1h2m3s`, `2m3s` or `3s`
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs() + u64::from(duration.subsec_millis() >= 500);
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);

    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Recursive sum of regular file sizes under `path`
///
/// Returns 0 when the directory does not exist. Unreadable entries are
/// skipped rather than failing the whole sum.
pub fn dir_size(path: &Path) -> u64 {
    if !path.exists() {
        return 0;
    }

    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Sum of sizes for a list of files, ignoring ones that vanished
pub fn files_size<'a>(files: impl IntoIterator<Item = &'a Path>) -> u64 {
    files
        .into_iter()
        .filter_map(|f| std::fs::metadata(f).ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
