//! Reconciler - aligns a library's catalog entries with the filesystem

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

use crate::classifier::is_media_file;
use crate::error::{Result, ScanError};
use crate::models::{
    mtime_millis, CatalogEntry, FileOutcome, Library, LibraryStatus, ReconcileReport,
};
use crate::store::{Catalog, LibraryRegistry};

/// Catalog snapshot of one library, keyed by absolute path
pub type KnownEntries = HashMap<String, CatalogEntry>;

/// Walks library roots and writes the differences into the catalog
pub struct Reconciler {
    registry: Arc<dyn LibraryRegistry>,
    catalog: Arc<dyn Catalog>,
    follow_links: bool,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("follow_links", &self.follow_links)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler over the given registry and catalog
    pub fn new(registry: Arc<dyn LibraryRegistry>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            registry,
            catalog,
            follow_links: false,
        }
    }

    /// Follow symlinks during the walk
    pub fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Reconcile a whole library.
    ///
    /// A missing or non-directory root marks the library ERROR and leaves its
    /// entries untouched. Walk faults abort the pass before the deletion sweep.
    pub fn reconcile_library(&self, library: &mut Library) -> Result<ReconcileReport> {
        let start = Instant::now();
        info!("Scanning library: {}", library.name);

        let root = resolve_root(library.root());
        if !root.is_dir() {
            return Err(self.root_unavailable(library, root));
        }
        if library.status != LibraryStatus::Ok {
            self.mark_status(library, LibraryStatus::Ok);
        }

        let known = self.load_known(library)?;
        let mut report = ReconcileReport::new(library.id);

        let walker = WalkDir::new(&root)
            .follow_links(self.follow_links)
            .into_iter();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let depth = e.depth();
                    let err = ScanError::from(e);
                    if err.is_not_found() {
                        if depth == 0 {
                            return Err(self.root_unavailable(library, root));
                        }
                        // Vanished between listing and stat
                        debug!("Skipping vanished entry: {:?}", err.path);
                        continue;
                    }
                    return Err(err);
                }
            };

            if entry.file_type().is_dir() {
                report.total_dirs += 1;
                continue;
            }

            let path = entry.path();
            if !is_media_file(path) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    let err = ScanError::from(e);
                    if err.is_not_found() {
                        debug!("File disappeared during scan: {}", path.display());
                        continue;
                    }
                    return Err(err);
                }
            };
            if !metadata.is_file() {
                continue;
            }

            report.total_files += 1;
            let mtime = metadata
                .modified()
                .map(mtime_millis)
                .map_err(|e| ScanError::from(e).with_path(path))?;
            match self.reconcile_file(library, path, metadata.len(), mtime, &known) {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    warn!("Failed to index {}: {}", path.display(), e);
                    report.failed_writes += 1;
                }
            }
        }

        // An offline root would make every entry look deleted
        if !root.is_dir() {
            return Err(self.root_unavailable(library, root));
        }

        for entry in known.values() {
            if Path::new(&entry.path).exists() {
                continue;
            }
            match self.catalog.delete(entry) {
                Ok(()) => {
                    info!("Removed deleted file: {}", entry.path);
                    report.removed += 1;
                    report.removed_paths.push(PathBuf::from(&entry.path));
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", entry.path, e);
                    report.failed_writes += 1;
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Scanned library {}: {} files, {} added, {} updated, {} removed in {}ms",
            library.name,
            report.total_files,
            report.added,
            report.updated,
            report.removed,
            report.duration_ms
        );
        Ok(report)
    }

    /// Bring one file's catalog entry in line with its current size and mtime
    pub fn reconcile_file(
        &self,
        library: &Library,
        path: &Path,
        size: u64,
        mtime: i64,
        known: &KnownEntries,
    ) -> Result<FileOutcome> {
        let key = path.to_string_lossy();
        match known.get(&*key) {
            Some(existing) if existing.is_stale(size, mtime) => {
                let mut updated = existing.clone();
                updated.size = size;
                updated.mtime = mtime;
                self.catalog.save(&updated).map_err(|e| e.with_path(path))?;
                info!("Updated file: {}", key);
                Ok(FileOutcome::Updated)
            }
            Some(_) => Ok(FileOutcome::Unchanged),
            None => {
                let entry = CatalogEntry::new(library.id, path, size, mtime);
                self.catalog.save(&entry).map_err(|e| e.with_path(path))?;
                info!("Added new file: {}", key);
                Ok(FileOutcome::Added)
            }
        }
    }

    /// Re-index a single changed path against a fresh catalog snapshot.
    ///
    /// Returns `None` when the path is gone, is not a regular file, or is not
    /// a media file.
    pub fn reconcile_path(&self, library: &Library, path: &Path) -> Result<Option<FileOutcome>> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ScanError::from(e).with_path(path)),
        };
        if !metadata.is_file() || !is_media_file(path) {
            return Ok(None);
        }

        let mtime = metadata
            .modified()
            .map(mtime_millis)
            .map_err(|e| ScanError::from(e).with_path(path))?;
        let known = self.load_known(library)?;
        self.reconcile_file(library, path, metadata.len(), mtime, &known)
            .map(Some)
    }

    /// Drop the entry for a deleted path. Returns whether an entry existed.
    pub fn remove_path(&self, library: &Library, path: &Path) -> Result<bool> {
        let key = path.to_string_lossy();
        match self.catalog.find_by_path(library.id, &key)? {
            Some(entry) => {
                self.catalog.delete(&entry)?;
                info!("Removed deleted file: {}", key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn load_known(&self, library: &Library) -> Result<KnownEntries> {
        let entries = self.catalog.find_by_library(library.id)?;
        Ok(entries.into_iter().map(|e| (e.path.clone(), e)).collect())
    }

    fn root_unavailable(&self, library: &mut Library, root: PathBuf) -> ScanError {
        error!(
            "Library path does not exist or is not a directory: {}",
            library.root_path
        );
        self.mark_status(library, LibraryStatus::Error);
        ScanError::path_unavailable(root)
    }

    /// Persist a status change; failures are logged and otherwise ignored
    fn mark_status(&self, library: &mut Library, status: LibraryStatus) {
        library.status = status;
        match self.registry.save_library(library) {
            Ok(_) => info!("Marked library {} as {}", library.name, status),
            Err(e) => warn!(
                "Failed to mark library {} as {}: {}",
                library.name, status, e
            ),
        }
    }
}

/// Absolute form of a library root, without resolving symlinks
pub fn resolve_root(root: &Path) -> PathBuf {
    std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn setup(root: &Path) -> (Arc<SqliteStore>, Reconciler, Library) {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let reconciler = Reconciler::new(store.clone(), store.clone());
        let library = store
            .create_library("Anime", root.to_str().unwrap())
            .unwrap();
        (store, reconciler, library)
    }

    fn write_file(path: &Path, size: usize) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, vec![0u8; size]).unwrap();
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn test_indexes_media_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("show.mp4"), 100);
        write_file(&root.join("season1/ep1.MKV"), 10);
        write_file(&root.join("season1/deep/ep2.avi"), 20);
        write_file(&root.join("cover.jpg"), 5);
        write_file(&root.join("notes.txt"), 5);

        let (store, reconciler, mut library) = setup(root);
        let report = reconciler.reconcile_library(&mut library).unwrap();

        assert_eq!(report.added, 3);
        assert_eq!(report.total_files, 3);
        assert_eq!(library.status, LibraryStatus::Ok);

        let entries = store.find_by_library(library.id).unwrap();
        let mut names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["ep1.MKV", "ep2.avi", "show.mp4"]);

        let show = entries.iter().find(|e| e.name == "show.mp4").unwrap();
        let metadata = fs::metadata(root.join("show.mp4")).unwrap();
        assert_eq!(show.size, 100);
        assert_eq!(show.mtime, mtime_millis(metadata.modified().unwrap()));
        assert!(Path::new(&show.path).is_absolute());
    }

    #[test]
    fn test_second_pass_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.mp4"), 1);
        write_file(&dir.path().join("b/c.mov"), 2);

        let (_store, reconciler, mut library) = setup(dir.path());
        let first = reconciler.reconcile_library(&mut library).unwrap();
        assert_eq!(first.writes(), 2);

        let second = reconciler.reconcile_library(&mut library).unwrap();
        assert_eq!(second.writes(), 0);
        assert_eq!(second.unchanged, 2);
    }

    #[test]
    fn test_update_then_delete_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let show = dir.path().join("show.mp4");
        write_file(&show, 100);
        set_mtime(&show, SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));

        let (store, reconciler, mut library) = setup(dir.path());
        reconciler.reconcile_library(&mut library).unwrap();
        let entries = store.find_by_library(library.id).unwrap();
        assert_eq!(entries.len(), 1);
        let original_id = entries[0].id;
        assert_eq!(entries[0].mtime, 1_000_000);

        write_file(&show, 150);
        let report = reconciler.reconcile_library(&mut library).unwrap();
        assert_eq!(report.updated, 1);
        let entries = store.find_by_library(library.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, original_id);
        assert_eq!(entries[0].size, 150);

        fs::remove_file(&show).unwrap();
        let report = reconciler.reconcile_library(&mut library).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.removed_paths, vec![resolve_root(&show)]);
        assert!(store.find_by_library(library.id).unwrap().is_empty());
    }

    #[test]
    fn test_mtime_only_change_updates() {
        let dir = tempfile::tempdir().unwrap();
        let show = dir.path().join("show.mp4");
        write_file(&show, 100);
        set_mtime(&show, SystemTime::UNIX_EPOCH + Duration::from_millis(5_000));

        let (store, reconciler, mut library) = setup(dir.path());
        reconciler.reconcile_library(&mut library).unwrap();

        set_mtime(&show, SystemTime::UNIX_EPOCH + Duration::from_millis(5_001));
        let report = reconciler.reconcile_library(&mut library).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(store.find_by_library(library.id).unwrap()[0].mtime, 5_001);
    }

    #[test]
    fn test_missing_root_marks_error_and_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("missing");
        let (store, reconciler, mut library) = setup(&root);
        let stale = CatalogEntry::new(library.id, &root.join("old.mp4"), 1, 1);
        store.save(&stale).unwrap();

        let err = reconciler.reconcile_library(&mut library).unwrap_err();
        assert_eq!(err.kind, crate::error::ScanErrorKind::PathUnavailable);
        assert_eq!(library.status, LibraryStatus::Error);
        assert_eq!(
            store.get_library(library.id).unwrap().unwrap().status,
            LibraryStatus::Error
        );
        assert_eq!(store.find_by_library(library.id).unwrap().len(), 1);

        fs::create_dir_all(&root).unwrap();
        write_file(&root.join("new.mkv"), 3);
        let report = reconciler.reconcile_library(&mut library).unwrap();
        assert_eq!(library.status, LibraryStatus::Ok);
        assert_eq!(
            store.get_library(library.id).unwrap().unwrap().status,
            LibraryStatus::Ok
        );
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn test_root_that_is_a_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("show.mp4");
        write_file(&file, 1);
        let (_store, reconciler, mut library) = setup(&file);

        assert!(reconciler.reconcile_library(&mut library).is_err());
        assert_eq!(library.status, LibraryStatus::Error);
    }

    /// Catalog that takes the library root offline when the snapshot is loaded
    struct UnmountingCatalog {
        inner: Arc<SqliteStore>,
        root: PathBuf,
    }

    impl Catalog for UnmountingCatalog {
        fn find_by_library(&self, library_id: i64) -> Result<Vec<CatalogEntry>> {
            let entries = self.inner.find_by_library(library_id)?;
            fs::remove_dir_all(&self.root).unwrap();
            Ok(entries)
        }

        fn find_by_path(&self, library_id: i64, path: &str) -> Result<Option<CatalogEntry>> {
            self.inner.find_by_path(library_id, path)
        }

        fn save(&self, entry: &CatalogEntry) -> Result<CatalogEntry> {
            self.inner.save(entry)
        }

        fn delete(&self, entry: &CatalogEntry) -> Result<()> {
            self.inner.delete(entry)
        }
    }

    #[test]
    fn test_root_lost_mid_pass_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("lib");
        write_file(&root.join("show.mp4"), 10);

        let (store, reconciler, mut library) = setup(&root);
        reconciler.reconcile_library(&mut library).unwrap();
        assert_eq!(store.find_by_library(library.id).unwrap().len(), 1);

        let catalog = Arc::new(UnmountingCatalog {
            inner: store.clone(),
            root: root.clone(),
        });
        let reconciler = Reconciler::new(store.clone(), catalog);
        let err = reconciler.reconcile_library(&mut library).unwrap_err();

        assert_eq!(err.kind, crate::error::ScanErrorKind::PathUnavailable);
        assert_eq!(library.status, LibraryStatus::Error);
        assert_eq!(store.find_by_library(library.id).unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_fault_aborts_before_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("a.mp4"), 1);
        fs::create_dir(root.join("nested")).unwrap();
        std::os::unix::fs::symlink(root, root.join("nested/loop")).unwrap();

        let (store, reconciler, mut library) = setup(root);
        let gone = CatalogEntry::new(library.id, &resolve_root(&root.join("gone.mp4")), 1, 1);
        store.save(&gone).unwrap();

        let reconciler = reconciler.with_follow_links(true);
        let err = reconciler.reconcile_library(&mut library).unwrap_err();
        assert_eq!(err.kind, crate::error::ScanErrorKind::IoError);

        // No sweep ran, so the stale entry is still there
        let paths: Vec<_> = store
            .find_by_library(library.id)
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert!(paths.contains(&gone.path));
        assert_eq!(library.status, LibraryStatus::Ok);
    }

    #[cfg(unix)]
    #[test]
    fn test_vanished_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("a.mp4"), 1);
        std::os::unix::fs::symlink(root.join("missing.mkv"), root.join("ghost.mp4")).unwrap();

        let (store, reconciler, mut library) = setup(root);
        let reconciler = reconciler.with_follow_links(true);
        let report = reconciler.reconcile_library(&mut library).unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.total_files, 1);
        let entries = store.find_by_library(library.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.mp4");
    }

    #[test]
    fn test_reconcile_path_and_remove_path() {
        let dir = tempfile::tempdir().unwrap();
        let (store, reconciler, library) = setup(dir.path());
        let show = resolve_root(&dir.path().join("show.mp4"));

        assert_eq!(reconciler.reconcile_path(&library, &show).unwrap(), None);

        write_file(&show, 10);
        assert_eq!(
            reconciler.reconcile_path(&library, &show).unwrap(),
            Some(FileOutcome::Added)
        );
        assert_eq!(
            reconciler.reconcile_path(&library, &show).unwrap(),
            Some(FileOutcome::Unchanged)
        );

        let notes = dir.path().join("notes.txt");
        write_file(&notes, 10);
        assert_eq!(reconciler.reconcile_path(&library, &notes).unwrap(), None);

        let other = resolve_root(&dir.path().join("other.mp4"));
        write_file(&other, 1);
        reconciler.reconcile_path(&library, &other).unwrap();

        assert!(reconciler.remove_path(&library, &show).unwrap());
        assert!(!reconciler.remove_path(&library, &show).unwrap());
        let remaining = store.find_by_library(library.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "other.mp4");
    }
}
