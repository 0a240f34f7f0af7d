use crate::error::{Error, ExtractionError};
use crate::extraction::shared::{extract_with_passwords_impl, is_password_error};
use crate::extraction::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create a valid ZIP archive containing a single file with the given name and content
fn create_zip_archive(archive_path: &Path, file_name: &str, content: &[u8]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    writer.start_file(file_name, options).unwrap();
    std::io::Write::write_all(&mut writer, content).unwrap();
    writer.finish().unwrap();
}

/// Create a password-encrypted ZIP using the deprecated ZipCrypto method
/// (only encryption method supported for writing by zip 0.6)
fn create_encrypted_zip(archive_path: &Path, file_name: &str, content: &[u8], password: &[u8]) {
    use ::zip::unstable::write::FileOptionsExt;
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options = ::zip::write::FileOptions::default()
        .compression_method(::zip::CompressionMethod::Stored)
        .with_deprecated_encryption(password);
    writer.start_file(file_name, options).unwrap();
    std::io::Write::write_all(&mut writer, content).unwrap();
    writer.finish().unwrap();
}

/// Create a valid 7z archive from a source directory using sevenz_rust
fn create_7z_archive(archive_path: &Path, source_dir: &Path) {
    sevenz_rust::compress_to_path(source_dir, archive_path).unwrap();
}

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, b"x").unwrap();
}

fn pw(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// PasswordList
// ---------------------------------------------------------------------------

#[test]
fn password_list_without_sources_still_tries_no_password() {
    let none: Vec<String> = Vec::new();
    let passwords = PasswordList::collect(&none, &none, false);
    assert!(!passwords.is_empty());

    let order: Vec<&str> = passwords.iter().map(|s| s.as_str()).collect();
    assert_eq!(order, vec![""]);
}

#[test]
fn password_list_skips_empty_password_when_disabled() {
    let passwords = PasswordList::from_combined(&pw(&["secret"]), false);

    let order: Vec<&str> = passwords.iter().map(|s| s.as_str()).collect();
    assert_eq!(order, vec!["secret"]);
}

#[test]
fn password_list_defaults_come_before_request() {
    let defaults = pw(&["global1", "global2"]);
    let request = pw(&["job"]);
    let passwords = PasswordList::collect(&defaults, &request, false);

    let order: Vec<&str> = passwords.iter().map(|s| s.as_str()).collect();
    assert_eq!(order, vec!["global1", "global2", "job"]);
}

#[test]
fn password_list_deduplicates_preserving_first_position() {
    let defaults = pw(&["duplicate", "unique"]);
    let request = pw(&["duplicate"]);
    let passwords = PasswordList::collect(&defaults, &request, false);

    let order: Vec<&str> = passwords.iter().map(|s| s.as_str()).collect();
    assert_eq!(order, vec!["duplicate", "unique"]);
}

#[test]
fn password_list_empty_password_goes_last() {
    let passwords = PasswordList::from_combined(&pw(&["test"]), true);

    let order: Vec<&str> = passwords.iter().map(|s| s.as_str()).collect();
    assert_eq!(order, vec!["test", ""]);
}

#[test]
fn password_list_does_not_add_second_empty_password() {
    let passwords = PasswordList::from_combined(&pw(&["", "a"]), true);
    assert_eq!(passwords.len(), 2);
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[test]
fn detect_archive_type_by_extension() {
    assert_eq!(
        detect_archive_type(Path::new("movie.rar")),
        Some(ArchiveType::Rar)
    );
    assert_eq!(
        detect_archive_type(Path::new("movie.r00")),
        Some(ArchiveType::Rar)
    );
    assert_eq!(
        detect_archive_type(Path::new("movie.7z")),
        Some(ArchiveType::SevenZip)
    );
    assert_eq!(
        detect_archive_type(Path::new("movie.zip")),
        Some(ArchiveType::Zip)
    );
    assert_eq!(detect_archive_type(Path::new("movie.mkv")), None);
    assert_eq!(detect_archive_type(Path::new("README")), None);
}

#[test]
fn detect_archive_type_is_case_insensitive() {
    assert_eq!(
        detect_archive_type(Path::new("TEST.RAR")),
        Some(ArchiveType::Rar)
    );
    assert_eq!(
        detect_archive_type(Path::new("TEST.7Z")),
        Some(ArchiveType::SevenZip)
    );
    assert_eq!(
        detect_archive_type(Path::new("/some/dir/TEST.ZIP")),
        Some(ArchiveType::Zip)
    );
}

#[test]
fn first_rar_volume_detection() {
    assert!(is_first_rar_volume("movie.rar"));
    assert!(is_first_rar_volume("movie.part01.rar"));
    assert!(is_first_rar_volume("movie.part001.rar"));
    assert!(is_first_rar_volume("movie.part1.rar"));
    assert!(is_first_rar_volume("Movie.PART01.RAR"));

    assert!(!is_first_rar_volume("movie.part02.rar"));
    assert!(!is_first_rar_volume("movie.part10.rar"));
    assert!(!is_first_rar_volume("movie.r00"));
    assert!(!is_first_rar_volume("movie.r01"));
    assert!(!is_first_rar_volume("movie.zip"));
}

#[test]
fn is_archive_file_only_accepts_first_volumes() {
    assert!(is_archive_file(Path::new("a/movie.part01.rar")));
    assert!(!is_archive_file(Path::new("a/movie.part02.rar")));
    assert!(!is_archive_file(Path::new("a/movie.r00")));
    assert!(is_archive_file(Path::new("a/movie.7z")));
    assert!(is_archive_file(Path::new("a/movie.zip")));
    assert!(!is_archive_file(Path::new("a/movie.nfo")));
}

#[test]
fn find_archives_recurses_and_sorts() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("b.zip"));
    touch(&dir.path().join("sub/a.part01.rar"));
    touch(&dir.path().join("sub/a.part02.rar"));
    touch(&dir.path().join("sub/deeper/c.7z"));
    touch(&dir.path().join("movie.mkv"));

    let archives = find_archives(dir.path());
    assert_eq!(
        archives,
        vec![
            dir.path().join("b.zip"),
            dir.path().join("sub/a.part01.rar"),
            dir.path().join("sub/deeper/c.7z"),
        ]
    );
}

#[test]
fn find_archives_empty_or_missing_directory() {
    let dir = TempDir::new().unwrap();
    assert!(find_archives(dir.path()).is_empty());
    assert!(find_archives(&dir.path().join("missing")).is_empty());
}

#[test]
fn archive_volumes_of_part_set() {
    let dir = TempDir::new().unwrap();
    for name in [
        "show.part01.rar",
        "show.part02.rar",
        "show.part03.rar",
        "other.part01.rar",
        "show.nfo",
    ] {
        touch(&dir.path().join(name));
    }

    let volumes = archive_volumes(&dir.path().join("show.part01.rar"));
    assert_eq!(
        volumes,
        vec![
            dir.path().join("show.part01.rar"),
            dir.path().join("show.part02.rar"),
            dir.path().join("show.part03.rar"),
        ]
    );
}

#[test]
fn archive_volumes_of_old_style_set() {
    let dir = TempDir::new().unwrap();
    for name in ["show.rar", "show.r00", "show.r01", "show.sfv", "showx.r00"] {
        touch(&dir.path().join(name));
    }

    let volumes = archive_volumes(&dir.path().join("show.rar"));
    assert_eq!(
        volumes,
        vec![
            dir.path().join("show.r00"),
            dir.path().join("show.r01"),
            dir.path().join("show.rar"),
        ]
    );
}

#[test]
fn archive_volumes_of_zip_is_itself() {
    let path = PathBuf::from("/data/thing.zip");
    assert_eq!(archive_volumes(&path), vec![path]);
}

#[test]
fn password_error_detection() {
    assert!(is_password_error("wrong password supplied"));
    assert!(is_password_error("file is encrypted"));
    assert!(is_password_error("ERAR_BAD_PASSWORD"));
    assert!(!is_password_error("CRC check failed"));
    assert!(!is_password_error("no such file or directory"));
    assert!(!is_password_error(""));
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn extract_archive_unknown_type_is_unsupported() {
    let passwords = PasswordList::from_combined(&[], true);
    let result = extract_archive(
        Path::new("test.txt"),
        Path::new("/tmp/extract"),
        &passwords,
    )
    .await;

    assert!(matches!(
        result,
        Err(Error::Extraction(ExtractionError::Unsupported(_)))
    ));
}

#[tokio::test]
async fn extract_archive_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let passwords = PasswordList::from_combined(&[], true);

    for name in ["TEST.RAR", "TEST.7Z", "TEST.ZIP"] {
        let result =
            extract_archive(&dir.path().join(name), &dir.path().join("out"), &passwords).await;
        assert!(result.is_err(), "{name} should fail to extract");
    }
}

#[tokio::test]
async fn zip_extracts_plain_archive() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("movie.zip");
    create_zip_archive(&archive, "movie.mkv", b"movie contents");

    let passwords = PasswordList::from_combined(&[], true);
    let files = extract_archive(&archive, dir.path(), &passwords)
        .await
        .unwrap();

    assert_eq!(files, vec![dir.path().join("movie.mkv")]);
    assert_eq!(
        std::fs::read(dir.path().join("movie.mkv")).unwrap(),
        b"movie contents"
    );
}

#[tokio::test]
async fn zip_tries_passwords_in_order() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("secret.zip");
    create_encrypted_zip(&archive, "secret.txt", b"hidden data", b"secret");

    let passwords = PasswordList::from_combined(&pw(&["wrong", "secret"]), false);
    let files = ZipExtractor::extract_with_passwords(&archive, &dir.path().join("out"), &passwords)
        .await
        .unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read(&files[0]).unwrap(), b"hidden data");
}

#[tokio::test]
async fn sevenz_extracts_and_reports_new_files_only() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("episode.mkv"), b"episode data").unwrap();

    let work = dir.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let archive = work.join("episode.7z");
    create_7z_archive(&archive, &source);

    let passwords = PasswordList::from_combined(&[], true);
    let files = SevenZipExtractor::extract_with_passwords(&archive, &work, &passwords)
        .await
        .unwrap();

    assert_eq!(files.len(), 1, "archive itself must not be reported");
    assert!(files[0].ends_with("episode.mkv"));
    assert_eq!(std::fs::read(&files[0]).unwrap(), b"episode data");
}

#[tokio::test]
async fn try_extract_missing_file_fails_for_each_format() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("extracted");

    assert!(SevenZipExtractor::try_extract(Path::new("nonexistent.7z"), "", &dest).is_err());
    assert!(ZipExtractor::try_extract(Path::new("nonexistent.zip"), "", &dest).is_err());
    assert!(RarExtractor::try_extract(Path::new("nonexistent.rar"), "", &dest).is_err());
}

#[tokio::test]
async fn extract_impl_reports_no_passwords() {
    let passwords = PasswordList::default();
    let result = extract_with_passwords_impl(
        "TEST",
        |_: &Path, _: &str, _: &Path| Ok(Vec::new()),
        Path::new("a.zip"),
        Path::new("out"),
        &passwords,
    )
    .await;

    assert!(matches!(
        result,
        Err(Error::Extraction(ExtractionError::NoPasswordsAvailable { .. }))
    ));
}

#[tokio::test]
async fn extract_impl_reports_all_passwords_failed() {
    let passwords = PasswordList::from_combined(&pw(&["a", "b"]), true);
    let result = extract_with_passwords_impl(
        "TEST",
        |archive: &Path, _: &str, _: &Path| {
            Err(Error::Extraction(ExtractionError::WrongPassword {
                archive: archive.to_path_buf(),
            }))
        },
        Path::new("a.zip"),
        Path::new("out"),
        &passwords,
    )
    .await;

    match result {
        Err(Error::Extraction(ExtractionError::AllPasswordsFailed { count, .. })) => {
            assert_eq!(count, 3);
        }
        other => panic!("expected AllPasswordsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn extract_impl_stops_on_non_password_error() {
    let attempts = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = attempts.clone();
    let passwords = PasswordList::from_combined(&pw(&["a", "b", "c"]), false);

    let result = extract_with_passwords_impl(
        "TEST",
        move |archive: &Path, _: &str, _: &Path| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(Error::Extraction(ExtractionError::Failed {
                archive: archive.to_path_buf(),
                reason: "CRC error".into(),
            }))
        },
        Path::new("a.zip"),
        Path::new("out"),
        &passwords,
    )
    .await;

    assert!(matches!(
        result,
        Err(Error::Extraction(ExtractionError::Failed { .. }))
    ));
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
}
