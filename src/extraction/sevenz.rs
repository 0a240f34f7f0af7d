use crate::error::{Error, ExtractionError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::password_list::PasswordList;
use super::shared::{extract_with_passwords_impl, io_error, is_password_error};

/// Archive extractor for 7z files
pub struct SevenZipExtractor;

impl SevenZipExtractor {
    /// Try to extract a 7z archive with a single password
    ///
    /// sevenz-rust doesn't report what it wrote, so the destination is
    /// listed before and after and the difference is returned.
    pub fn try_extract(
        archive_path: &Path,
        password: &str,
        dest_path: &Path,
    ) -> Result<Vec<PathBuf>> {
        debug!(
            ?archive_path,
            password_length = password.len(),
            ?dest_path,
            "attempting 7z extraction"
        );

        std::fs::create_dir_all(dest_path)
            .map_err(|e| io_error("failed to create destination", e))?;

        let before: HashSet<PathBuf> = list_files(dest_path).into_iter().collect();

        use sevenz_rust::Password;
        let result = if password.is_empty() {
            sevenz_rust::decompress_file(archive_path, dest_path)
        } else {
            let pw = Password::from(password);
            sevenz_rust::decompress_file_with_password(archive_path, dest_path, pw)
        };

        match result {
            Ok(()) => {
                Self::validate_extracted_paths(dest_path)?;

                let extracted_files: Vec<PathBuf> = list_files(dest_path)
                    .into_iter()
                    .filter(|f| !before.contains(f))
                    .collect();

                info!(
                    ?archive_path,
                    extracted_count = extracted_files.len(),
                    "7z extraction successful"
                );
                Ok(extracted_files)
            }
            Err(e) => {
                let err_str = e.to_string();
                if is_password_error(&err_str) {
                    Err(Error::Extraction(ExtractionError::WrongPassword {
                        archive: archive_path.to_path_buf(),
                    }))
                } else {
                    Err(Error::Extraction(ExtractionError::Failed {
                        archive: archive_path.to_path_buf(),
                        reason: format!("failed to extract 7z archive: {}", e),
                    }))
                }
            }
        }
    }

    /// Reject extractions that resolved outside the destination directory
    fn validate_extracted_paths(dest_path: &Path) -> Result<()> {
        let canonical_dest = dest_path
            .canonicalize()
            .map_err(|e| io_error("failed to canonicalize destination path", e))?;

        for entry in WalkDir::new(dest_path).min_depth(1) {
            let entry = entry.map_err(|e| io_error("failed to read entry", e))?;
            let canonical = entry
                .path()
                .canonicalize()
                .map_err(|e| io_error("failed to canonicalize extracted path", e))?;

            if !canonical.starts_with(&canonical_dest) {
                return Err(Error::Extraction(ExtractionError::Failed {
                    archive: dest_path.to_path_buf(),
                    reason: format!(
                        "path traversal detected: extracted file {:?} is outside destination",
                        canonical
                    ),
                }));
            }
        }
        Ok(())
    }

    /// Extract 7z archive with password attempts
    pub async fn extract_with_passwords(
        archive_path: &Path,
        dest_path: &Path,
        passwords: &PasswordList,
    ) -> Result<Vec<PathBuf>> {
        extract_with_passwords_impl(
            "7z",
            Self::try_extract,
            archive_path,
            dest_path,
            passwords,
        )
        .await
    }
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}
