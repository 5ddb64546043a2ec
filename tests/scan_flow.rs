//! End-to-end scanning and watching against a real directory tree

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use media_indexer::{
    Catalog, LibraryRegistry, LibraryStatus, ScanConfig, ScanCoordinator, SqliteStore,
};

fn setup(debounce_ms: u64) -> (Arc<SqliteStore>, ScanCoordinator) {
    let store = Arc::new(SqliteStore::open_memory().unwrap());
    let config = ScanConfig::builder()
        .worker_threads(4)
        .debounce_ms(debounce_ms)
        .build();
    let coordinator = ScanCoordinator::new(store.clone(), store.clone(), &config).unwrap();
    (store, coordinator)
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    condition()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_scan_all_isolates_bad_library() {
    let good = tempfile::tempdir().unwrap();
    fs::write(good.path().join("a.mp4"), b"a").unwrap();
    fs::create_dir(good.path().join("sub")).unwrap();
    fs::write(good.path().join("sub/b.mov"), b"bb").unwrap();
    let missing = good.path().join("does-not-exist");

    let (store, coordinator) = setup(100);
    let bad_lib = store.create_library("Bad", path_str(&missing)).unwrap();
    let good_lib = store.create_library("Good", path_str(good.path())).unwrap();

    coordinator.scan_all();
    assert!(wait_for(|| coordinator.active_scans() == 0));

    assert_eq!(store.find_by_library(good_lib.id).unwrap().len(), 2);
    assert_eq!(
        store.get_library(good_lib.id).unwrap().unwrap().status,
        LibraryStatus::Ok
    );
    assert_eq!(
        store.get_library(bad_lib.id).unwrap().unwrap().status,
        LibraryStatus::Error
    );
    assert!(coordinator.is_watching(good_lib.id));
    assert!(!coordinator.is_watching(bad_lib.id));
}

#[test]
fn test_missing_root_recovers_on_rescan() {
    let parent = tempfile::tempdir().unwrap();
    let root = parent.path().join("missing");
    let (store, coordinator) = setup(100);
    let library = store.create_library("Later", path_str(&root)).unwrap();

    assert!(coordinator.scan_library(library.clone()).is_none());
    let library = store.get_library(library.id).unwrap().unwrap();
    assert_eq!(library.status, LibraryStatus::Error);

    fs::create_dir(&root).unwrap();
    fs::write(root.join("ep1.mkv"), b"x").unwrap();
    let report = coordinator.scan_library(library.clone()).unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(
        store.get_library(library.id).unwrap().unwrap().status,
        LibraryStatus::Ok
    );
}

#[test]
fn test_watcher_keeps_catalog_in_sync() {
    let dir = tempfile::tempdir().unwrap();
    let (store, coordinator) = setup(200);
    let library = store.create_library("Live", path_str(dir.path())).unwrap();
    coordinator.scan_library(library.clone()).unwrap();
    assert!(store.find_by_library(library.id).unwrap().is_empty());

    let show = dir.path().join("show.mp4");
    fs::write(&show, vec![0u8; 100]).unwrap();
    assert!(wait_for(|| store
        .find_by_path(library.id, path_str(&show))
        .unwrap()
        .is_some_and(|e| e.size == 100)));
    let id = store
        .find_by_path(library.id, path_str(&show))
        .unwrap()
        .unwrap()
        .id;

    fs::write(&show, vec![0u8; 150]).unwrap();
    assert!(wait_for(|| store
        .find_by_path(library.id, path_str(&show))
        .unwrap()
        .is_some_and(|e| e.size == 150 && e.id == id)));

    fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
    fs::remove_file(&show).unwrap();
    assert!(wait_for(|| store.find_by_library(library.id).unwrap().is_empty()));

    coordinator.stop_watching(library.id);
    fs::write(dir.path().join("late.mp4"), b"late").unwrap();
    std::thread::sleep(Duration::from_millis(600));
    assert!(store.find_by_library(library.id).unwrap().is_empty());
}

#[test]
fn test_shutdown_drops_pending_changes() {
    let dir = tempfile::tempdir().unwrap();
    let (store, coordinator) = setup(1_000);
    let library = store.create_library("Quiet", path_str(dir.path())).unwrap();
    coordinator.scan_library(library.clone()).unwrap();

    fs::write(dir.path().join("new.avi"), b"x").unwrap();
    assert!(wait_for(|| coordinator.pending_changes() > 0));
    coordinator.shutdown();

    std::thread::sleep(Duration::from_millis(1_500));
    assert!(store.find_by_library(library.id).unwrap().is_empty());
    assert!(coordinator.watched_libraries().is_empty());
}
