//! On-disk "already extracted" markers
//!
//! A marker is a hidden file next to an archive, named
//! `.<archive file name>.unpackarr`, holding the RFC 3339 time it was
//! written. Its presence tells the folder watcher to leave the directory
//! alone; the content is informational only. Markers are only used when
//! original archives are kept, since a deleted archive cannot be re-found.

use crate::error::{Error, Result};
use crate::extraction;
use crate::types::Event;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File name suffix shared by all markers
pub const MARKER_SUFFIX: &str = ".unpackarr";

/// Marker location for `archive`, or `None` if the path has no file name
pub fn marker_path(archive: &Path) -> Option<PathBuf> {
    let name = archive.file_name()?.to_str()?;
    let marker = format!(".{}{}", name, MARKER_SUFFIX);
    Some(match archive.parent() {
        Some(parent) => parent.join(marker),
        None => PathBuf::from(marker),
    })
}

/// Archive a marker refers to, or `None` if `marker` is not a marker file
pub fn archive_for_marker(marker: &Path) -> Option<PathBuf> {
    let name = marker.file_name()?.to_str()?;
    let archive_name = name.strip_prefix('.')?.strip_suffix(MARKER_SUFFIX)?;
    if archive_name.is_empty() {
        return None;
    }
    Some(match marker.parent() {
        Some(parent) => parent.join(archive_name),
        None => PathBuf::from(archive_name),
    })
}

/// Write the marker for `archive`, returning the marker path
pub fn write_marker(archive: &Path) -> Result<PathBuf> {
    let path = marker_path(archive).ok_or_else(|| Error::Marker {
        path: archive.to_path_buf(),
        reason: "archive path has no file name".into(),
    })?;

    let contents = format!("{}\n", Utc::now().to_rfc3339());
    std::fs::write(&path, contents).map_err(|e| Error::Marker {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    debug!(marker = %path.display(), "marker written");
    Ok(path)
}

/// Whether the first archive found under `dir` already has a marker
pub fn has_marker(dir: &Path) -> bool {
    extraction::find_archives(dir)
        .first()
        .and_then(|archive| marker_path(archive))
        .is_some_and(|marker| marker.is_file())
}

/// Mark `dir` as handled by writing a marker for its first archive
///
/// Returns `Ok(None)` when the directory holds no archives.
pub fn mark_directory(dir: &Path) -> Result<Option<PathBuf>> {
    match extraction::find_archives(dir).first() {
        Some(archive) => write_marker(archive).map(Some),
        None => Ok(None),
    }
}

/// Delete every marker under `root` whose archive no longer exists
///
/// Unreadable subtrees and failed removals are logged and skipped. Returns
/// the number of markers removed.
pub fn clean_orphaned_markers(root: &Path, event_tx: &broadcast::Sender<Event>) -> usize {
    let mut removed = 0;

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, root = %root.display(), "skipping unreadable path during marker cleanup");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(archive) = archive_for_marker(entry.path()) else {
            continue;
        };

        if archive.exists() {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                info!(
                    marker = %entry.path().display(),
                    archive = %archive.display(),
                    "removed orphaned marker"
                );
                removed += 1;
                event_tx
                    .send(Event::MarkerRemoved {
                        path: entry.path().to_path_buf(),
                    })
                    .ok();
            }
            Err(e) => warn!(
                error = %e,
                marker = %entry.path().display(),
                "failed to remove orphaned marker"
            ),
        }
    }

    removed
}
