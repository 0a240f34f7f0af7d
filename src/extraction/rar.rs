use crate::error::{Error, ExtractionError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::password_list::PasswordList;
use super::shared::{extract_with_passwords_impl, io_error, is_password_error};

/// Archive extractor for RAR files
pub struct RarExtractor;

impl RarExtractor {
    /// Convert an unrar error to our error type, checking for password errors
    fn convert_unrar_error(e: unrar::error::UnrarError, archive_path: &Path) -> Error {
        let err_str = e.to_string();
        if is_password_error(&err_str) {
            Error::Extraction(ExtractionError::WrongPassword {
                archive: archive_path.to_path_buf(),
            })
        } else {
            Error::Extraction(ExtractionError::Failed {
                archive: archive_path.to_path_buf(),
                reason: err_str,
            })
        }
    }

    /// Try to extract a RAR archive with a single password
    ///
    /// Subsequent volumes (`.part02.rar`, `.r00`, ...) are picked up by unrar
    /// from the first volume.
    pub fn try_extract(
        archive_path: &Path,
        password: &str,
        dest_path: &Path,
    ) -> Result<Vec<PathBuf>> {
        debug!(
            ?archive_path,
            password_length = password.len(),
            ?dest_path,
            "attempting RAR extraction"
        );

        std::fs::create_dir_all(dest_path)
            .map_err(|e| io_error("failed to create destination", e))?;

        let archive = if password.is_empty() {
            unrar::Archive::new(archive_path)
        } else {
            unrar::Archive::with_password(archive_path, password.as_bytes())
        };

        let processor = archive
            .open_for_processing()
            .map_err(|e| Self::convert_unrar_error(e, archive_path))?;

        let mut extracted_files = Vec::new();

        let mut at_header = processor;
        loop {
            let at_file = match at_header.read_header() {
                Ok(Some(entry_processor)) => entry_processor,
                Ok(None) => break,
                Err(e) => return Err(Self::convert_unrar_error(e, archive_path)),
            };

            let header = at_file.entry();

            // Keep only normal components so "../" entries cannot escape dest_path
            let sanitized = Path::new(&header.filename)
                .components()
                .filter(|c| matches!(c, std::path::Component::Normal(_)))
                .collect::<PathBuf>();

            if sanitized.as_os_str().is_empty() {
                at_header = at_file.skip().map_err(|e| {
                    Error::Extraction(ExtractionError::Failed {
                        archive: archive_path.to_path_buf(),
                        reason: format!("failed to skip unsafe entry: {}", e),
                    })
                })?;
                continue;
            }

            let file_path = dest_path.join(&sanitized);

            if !header.is_directory() {
                at_header = at_file
                    .extract_to(&file_path)
                    .map_err(|e| Self::convert_unrar_error(e, archive_path))?;
                extracted_files.push(file_path);
            } else {
                at_header = at_file.skip().map_err(|e| {
                    Error::Extraction(ExtractionError::Failed {
                        archive: archive_path.to_path_buf(),
                        reason: format!("failed to skip directory: {}", e),
                    })
                })?;
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "RAR extraction successful"
        );

        Ok(extracted_files)
    }

    /// Extract RAR archive with password attempts
    pub async fn extract_with_passwords(
        archive_path: &Path,
        dest_path: &Path,
        passwords: &PasswordList,
    ) -> Result<Vec<PathBuf>> {
        extract_with_passwords_impl(
            "RAR",
            Self::try_extract,
            archive_path,
            dest_path,
            passwords,
        )
        .await
    }
}
