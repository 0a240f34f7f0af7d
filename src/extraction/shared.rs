use crate::error::{Error, ExtractionError, Result};
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use super::password_list::PasswordList;

/// Shared implementation for archive extraction with password attempts.
///
/// Tries each password in the list by calling `try_extract_fn` via `spawn_blocking`.
/// A wrong-password error moves on to the next candidate; any other error
/// aborts immediately.
pub(crate) async fn extract_with_passwords_impl(
    format_name: &str,
    try_extract_fn: impl Fn(&Path, &str, &Path) -> Result<Vec<PathBuf>> + Send + 'static + Clone,
    archive_path: &Path,
    dest_path: &Path,
    passwords: &PasswordList,
) -> Result<Vec<PathBuf>> {
    if passwords.is_empty() {
        warn!(
            ?archive_path,
            "no passwords to try for {} extraction", format_name
        );
        return Err(Error::Extraction(ExtractionError::NoPasswordsAvailable {
            archive: archive_path.to_path_buf(),
        }));
    }

    info!(
        ?archive_path,
        password_count = passwords.len(),
        "attempting {} extraction with {} password(s)",
        format_name,
        passwords.len()
    );

    for (i, password) in passwords.iter().enumerate() {
        debug!(
            attempt = i + 1,
            total = passwords.len(),
            password_length = password.len(),
            "trying password {}/{}",
            i + 1,
            passwords.len()
        );

        // Use spawn_blocking to avoid blocking the async runtime during extraction
        let archive_path_owned = archive_path.to_path_buf();
        let dest_path_owned = dest_path.to_path_buf();
        let password_owned = password.clone();
        let try_fn = try_extract_fn.clone();

        let result =
            spawn_blocking(move || try_fn(&archive_path_owned, &password_owned, &dest_path_owned))
                .await
                .map_err(|e| {
                    Error::Extraction(ExtractionError::Failed {
                        archive: archive_path.to_path_buf(),
                        reason: format!("extraction task panicked: {}", e),
                    })
                })?;

        match result {
            Ok(files) => {
                info!(
                    ?archive_path,
                    attempt = i + 1,
                    "{} extraction successful on attempt {}/{}",
                    format_name,
                    i + 1,
                    passwords.len()
                );
                return Ok(files);
            }
            Err(Error::Extraction(ExtractionError::WrongPassword { .. })) => {
                debug!(attempt = i + 1, "wrong password, trying next");
                continue;
            }
            Err(e) => {
                // Other error (corrupt archive, disk full, etc.)
                warn!(
                    error = %e,
                    ?archive_path,
                    "{} extraction failed with non-password error",
                    format_name
                );
                return Err(e);
            }
        }
    }

    warn!(
        ?archive_path,
        attempted = passwords.len(),
        "all passwords failed for {} extraction",
        format_name
    );
    Err(Error::Extraction(ExtractionError::AllPasswordsFailed {
        archive: archive_path.to_path_buf(),
        count: passwords.len(),
    }))
}

/// Map an I/O failure inside an extractor to our error type
pub(crate) fn io_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Io(std::io::Error::other(format!("{}: {}", context, e)))
}

/// Whether an extractor error message points at a bad password
pub(crate) fn is_password_error(error_msg: &str) -> bool {
    let lower = error_msg.to_lowercase();
    lower.contains("password") || lower.contains("encrypted") || error_msg.contains("ERAR_BAD_PASSWORD")
}
