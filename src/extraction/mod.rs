//! Archive detection and extraction with password support
//!
//! RAR (including multi-volume sets), 7z, and ZIP archives are recognized.
//! A RAR set is only ever addressed through its first volume.

mod password_list;
mod rar;
mod sevenz;
mod shared;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use password_list::PasswordList;
pub use rar::RarExtractor;
pub use sevenz::SevenZipExtractor;
pub use zip::ZipExtractor;

use crate::error::{Error, ExtractionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Archive formats the extractor can open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    Rar,
    SevenZip,
    Zip,
}

/// Detect archive type by file extension
///
/// Any RAR volume (`.rar`, `.r00`, `.r01`, ...) maps to [`ArchiveType::Rar`];
/// use [`is_archive_file`] to tell whether a file starts an archive.
pub fn detect_archive_type(path: &Path) -> Option<ArchiveType> {
    let ext = path.extension()?.to_str()?.to_lowercase();

    match ext.as_str() {
        "rar" => Some(ArchiveType::Rar),
        "7z" => Some(ArchiveType::SevenZip),
        "zip" => Some(ArchiveType::Zip),
        e if is_old_style_rar_ext(e) => Some(ArchiveType::Rar),
        _ => None,
    }
}

fn is_old_style_rar_ext(ext: &str) -> bool {
    ext.len() == 3 && ext.starts_with('r') && ext[1..].chars().all(|c| c.is_ascii_digit())
}

/// Check if a filename is the first volume of a RAR archive.
///
/// - `name.rar` is the first volume
/// - `name.part01.rar` / `name.part001.rar` / `name.part1.rar` is the first volume
/// - `name.part02.rar` and `name.r00`, `name.r01`, ... are not
pub fn is_first_rar_volume(filename: &str) -> bool {
    let lower = filename.to_lowercase();

    let Some(stem) = lower.strip_suffix(".rar") else {
        return false;
    };

    if let Some(part_idx) = stem.rfind(".part") {
        let num_str = &stem[part_idx + 5..];
        if !num_str.is_empty() && num_str.chars().all(|c| c.is_ascii_digit()) {
            return num_str.parse::<u32>().map(|n| n == 1).unwrap_or(false);
        }
    }

    true
}

/// Whether a file starts an archive this crate can extract
pub fn is_archive_file(path: &Path) -> bool {
    match detect_archive_type(path) {
        Some(ArchiveType::Rar) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_first_rar_volume),
        Some(_) => true,
        None => false,
    }
}

/// Find every extractable archive under `dir`, recursively and sorted by path
///
/// Unreadable entries are skipped. A missing directory yields no archives.
pub fn find_archives(dir: &Path) -> Vec<PathBuf> {
    let mut archives: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, ?dir, "skipping unreadable entry while looking for archives");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_archive_file(path))
        .collect();

    archives.sort();
    archives
}

/// Every file on disk that belongs to the archive started by `archive`
///
/// For a RAR set this is all of its volumes; for anything else it is the
/// archive itself. Used when deleting originals after extraction.
pub fn archive_volumes(archive: &Path) -> Vec<PathBuf> {
    let Some(file_name) = archive.file_name().and_then(|n| n.to_str()) else {
        return vec![archive.to_path_buf()];
    };
    if detect_archive_type(archive) != Some(ArchiveType::Rar) {
        return vec![archive.to_path_buf()];
    }

    let lower = file_name.to_lowercase();
    let Some(stem) = lower.strip_suffix(".rar") else {
        return vec![archive.to_path_buf()];
    };

    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let siblings = match std::fs::read_dir(parent) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect::<Vec<_>>(),
        Err(e) => {
            warn!(error = %e, ?parent, "failed to list archive volumes");
            return vec![archive.to_path_buf()];
        }
    };

    // name.part01.rar -> every name.partNN.rar
    let part_base = stem.rfind(".part").and_then(|idx| {
        let num_str = &stem[idx + 5..];
        (!num_str.is_empty() && num_str.chars().all(|c| c.is_ascii_digit())).then(|| &stem[..idx])
    });

    let mut volumes: Vec<PathBuf> = siblings
        .into_iter()
        .filter(|p| {
            let Some(name) = p.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            let name = name.to_lowercase();
            match part_base {
                Some(base) => name
                    .strip_prefix(base)
                    .and_then(|rest| rest.strip_prefix(".part"))
                    .and_then(|rest| rest.strip_suffix(".rar"))
                    .is_some_and(|num| !num.is_empty() && num.chars().all(|c| c.is_ascii_digit())),
                None => {
                    name == lower
                        || name
                            .strip_prefix(stem)
                            .and_then(|rest| rest.strip_prefix('.'))
                            .is_some_and(is_old_style_rar_ext)
                }
            }
        })
        .collect();

    volumes.sort();
    if volumes.is_empty() {
        volumes.push(archive.to_path_buf());
    }
    volumes
}

/// Unified archive extraction dispatcher
///
/// Detects the archive type and routes to the matching extractor, which
/// tries every password in `passwords` until one works.
pub async fn extract_archive(
    archive_path: &Path,
    dest_path: &Path,
    passwords: &PasswordList,
) -> Result<Vec<PathBuf>> {
    let archive_type = detect_archive_type(archive_path).ok_or_else(|| {
        Error::Extraction(ExtractionError::Unsupported(archive_path.to_path_buf()))
    })?;

    info!(
        ?archive_path,
        ?archive_type,
        "dispatching extraction to appropriate extractor"
    );

    match archive_type {
        ArchiveType::Rar => {
            RarExtractor::extract_with_passwords(archive_path, dest_path, passwords).await
        }
        ArchiveType::SevenZip => {
            SevenZipExtractor::extract_with_passwords(archive_path, dest_path, passwords).await
        }
        ArchiveType::Zip => {
            ZipExtractor::extract_with_passwords(archive_path, dest_path, passwords).await
        }
    }
}
