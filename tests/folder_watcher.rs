//! Folder watcher scanning, marker skipping and orphan cleanup

mod common;

use common::{FakeExtractor, Harness, create_zip, touch, wait_until};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use unpackarr::{FolderWatcher, MIN_POLL_INTERVAL, ScanSummary, WatchConfig, marker};

fn watch_config(root: &TempDir) -> WatchConfig {
    WatchConfig {
        enabled: true,
        paths: vec![root.path().to_path_buf()],
        poll_interval: Duration::from_secs(3600),
        marker_cleanup_interval: Duration::from_secs(3600),
    }
}

#[tokio::test]
async fn scan_submits_archive_directories_once() {
    let root = TempDir::new().unwrap();
    touch(&root.path().join("show/show.part01.rar"));
    touch(&root.path().join("show/show.part02.rar"));
    create_zip(&root.path().join("movie/movie.zip"), "movie.mkv", b"data");
    touch(&root.path().join("notes/readme.txt"));

    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor.clone(), Vec::new());
    let watcher = FolderWatcher::new(watch_config(&root), true, h.queue.clone(), h.events.clone());

    let first = watcher.scan_once().await;
    assert_eq!(
        first,
        ScanSummary {
            submitted: 2,
            ..Default::default()
        }
    );

    let second = watcher.scan_once().await;
    assert_eq!(second.submitted, 0);
    assert_eq!(second.duplicates, 2);

    let names: Vec<String> = (0..extractor.job_count())
        .map(|i| extractor.job(i).name)
        .collect();
    assert_eq!(names, vec!["movie".to_string(), "show".to_string()]);
    assert!(extractor.job(0).delete_original);
}

#[tokio::test]
async fn marked_directories_are_skipped_when_originals_are_kept() {
    let root = TempDir::new().unwrap();
    let archive = root.path().join("done/done.rar");
    touch(&archive);
    marker::write_marker(&archive).unwrap();
    touch(&root.path().join("fresh/fresh.rar"));

    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor.clone(), Vec::new());
    let watcher = FolderWatcher::new(watch_config(&root), false, h.queue.clone(), h.events.clone());

    let summary = watcher.scan_once().await;
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.marked, 1);
    assert_eq!(extractor.job(0).path, root.path().join("fresh"));
    assert!(!extractor.job(0).delete_original);
}

#[tokio::test]
async fn markers_are_ignored_when_originals_are_deleted() {
    let root = TempDir::new().unwrap();
    let archive = root.path().join("old/old.rar");
    touch(&archive);
    marker::write_marker(&archive).unwrap();

    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor.clone(), Vec::new());
    let watcher = FolderWatcher::new(watch_config(&root), true, h.queue.clone(), h.events.clone());

    let summary = watcher.scan_once().await;
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.marked, 0);
}

#[tokio::test]
async fn start_cleans_orphans_then_scans() {
    let root = TempDir::new().unwrap();
    let gone = root.path().join("gone/gone.rar");
    touch(&gone);
    let orphan = marker::write_marker(&gone).unwrap();
    std::fs::remove_file(&gone).unwrap();
    std::fs::write(root.path().join("gone/gone.mkv"), b"video").unwrap();
    touch(&root.path().join("new/new.7z"));

    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor.clone(), Vec::new());
    let watcher = Arc::new(FolderWatcher::new(
        watch_config(&root),
        false,
        h.queue.clone(),
        h.events.clone(),
    ));

    watcher.start().await.unwrap();
    assert!(!orphan.exists());
    assert!(wait_until(Duration::from_secs(5), || extractor.job_count() == 1).await);
    assert_eq!(extractor.job(0).path, root.path().join("new"));

    watcher.stop().await;
}

#[tokio::test]
async fn disabled_watcher_does_nothing() {
    let root = TempDir::new().unwrap();
    touch(&root.path().join("movie/movie.rar"));

    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor.clone(), Vec::new());
    let mut config = watch_config(&root);
    config.enabled = false;
    let watcher = Arc::new(FolderWatcher::new(config, true, h.queue.clone(), h.events.clone()));

    watcher.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(extractor.job_count(), 0);
    assert_eq!(watcher.paths(), &[PathBuf::from(root.path())]);
    watcher.stop().await;
}

#[tokio::test]
async fn zero_or_tiny_intervals_do_not_crash_the_loops() {
    let root = TempDir::new().unwrap();
    touch(&root.path().join("movie/movie.rar"));

    let extractor = Arc::new(FakeExtractor::default());
    let h = Harness::new(extractor.clone(), Vec::new());
    let mut config = watch_config(&root);
    config.poll_interval = Duration::ZERO;
    config.marker_cleanup_interval = Duration::ZERO;
    let watcher = Arc::new(FolderWatcher::new(config, false, h.queue.clone(), h.events.clone()));
    assert_eq!(watcher.poll_interval(), Duration::from_secs(120));

    watcher.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || extractor.job_count() == 1).await);
    watcher.stop().await;

    let mut config = watch_config(&root);
    config.poll_interval = Duration::from_nanos(3);
    let watcher = FolderWatcher::new(config, false, h.queue.clone(), h.events.clone());
    assert_eq!(watcher.poll_interval(), MIN_POLL_INTERVAL);
}
