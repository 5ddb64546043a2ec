//! Scan coordinator - dispatches library scans and owns the live monitors

use dashmap::DashMap;
use log::{debug, error, info, warn};
use rayon::ThreadPool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::ScanConfig;
use crate::debounce::Debouncer;
use crate::error::{Result, ScanError};
use crate::models::{Library, LibraryId, ReconcileReport};
use crate::monitor::{LibraryChangeHandler, MonitorHandle};
use crate::reconciler::Reconciler;
use crate::store::{Catalog, LibraryRegistry};

struct Inner {
    registry: Arc<dyn LibraryRegistry>,
    reconciler: Arc<Reconciler>,
    debouncer: Debouncer,
    monitors: DashMap<LibraryId, MonitorHandle>,
    active_scans: AtomicUsize,
    stopped: AtomicBool,
}

/// Runs library scans on a bounded pool and keeps one monitor per scanned library.
///
/// Every background failure is logged where it happens; nothing is reported
/// back to the caller of a fire-and-forget operation.
pub struct ScanCoordinator {
    inner: Arc<Inner>,
    pool: ThreadPool,
}

impl std::fmt::Debug for ScanCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanCoordinator")
            .field("workers", &self.pool.current_num_threads())
            .field("monitors", &self.inner.monitors.len())
            .field("active_scans", &self.active_scans())
            .finish()
    }
}

impl ScanCoordinator {
    /// Wire a coordinator to its registry and catalog
    pub fn new(
        registry: Arc<dyn LibraryRegistry>,
        catalog: Arc<dyn Catalog>,
        config: &ScanConfig,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_threads())
            .thread_name(|i| format!("scan-worker-{}", i))
            .build()
            .map_err(|e| ScanError::io_error(None, format!("Failed to build worker pool: {}", e)))?;
        let reconciler = Reconciler::new(Arc::clone(&registry), catalog)
            .with_follow_links(config.follow_links);
        let debouncer = Debouncer::new(config.debounce_window())?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                reconciler: Arc::new(reconciler),
                debouncer,
                monitors: DashMap::new(),
                active_scans: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
            }),
            pool,
        })
    }

    /// Queue a scan of every registered library and return immediately
    pub fn scan_all(&self) {
        let libraries = match self.inner.registry.list_libraries() {
            Ok(libraries) => libraries,
            Err(e) => {
                error!("Failed to load libraries: {}", e);
                return;
            }
        };
        info!("Queueing scan of {} libraries", libraries.len());
        for library in libraries {
            self.dispatch(library);
        }
    }

    /// Queue a scan of one library by id; unknown ids are ignored
    pub fn scan_one(&self, library_id: LibraryId) {
        match self.inner.registry.get_library(library_id) {
            Ok(Some(library)) => self.dispatch(library),
            Ok(None) => warn!("No library with id {}, nothing to scan", library_id),
            Err(e) => error!("Failed to load library {}: {}", library_id, e),
        }
    }

    /// Queue a scan of an already-loaded library
    pub fn dispatch(&self, library: Library) {
        self.inner.active_scans.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        self.pool.spawn(move || {
            let _guard = ScanGuard(&inner.active_scans);
            inner.scan_library(library);
        });
    }

    /// Scan a library on the calling thread, then (re)start its monitor.
    ///
    /// Returns `None` if the pass failed; the failure has already been logged.
    pub fn scan_library(&self, library: Library) -> Option<ReconcileReport> {
        self.inner.scan_library(library)
    }

    /// Close and forget the monitor of a library, if it has one
    pub fn stop_watching(&self, library_id: LibraryId) {
        if let Some((_, handle)) = self.inner.monitors.remove(&library_id) {
            handle.close();
        }
    }

    /// Whether a monitor is registered for the library
    pub fn is_watching(&self, library_id: LibraryId) -> bool {
        self.inner.monitors.contains_key(&library_id)
    }

    /// Libraries that currently have a monitor
    pub fn watched_libraries(&self) -> Vec<LibraryId> {
        let mut ids: Vec<_> = self.inner.monitors.iter().map(|m| *m.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Scans queued or running on the worker pool
    pub fn active_scans(&self) -> usize {
        self.inner.active_scans.load(Ordering::SeqCst)
    }

    /// Changes waiting out their debounce window
    pub fn pending_changes(&self) -> usize {
        self.inner.debouncer.pending_count()
    }

    /// Close every monitor and stop the debounce runner.
    ///
    /// Debounced writes that have not started yet are dropped.
    pub fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<_> = self.inner.monitors.iter().map(|m| *m.key()).collect();
        for id in ids {
            self.stop_watching(id);
        }
        self.inner.debouncer.shutdown();
        info!("Scan coordinator stopped");
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn scan_library(&self, mut library: Library) -> Option<ReconcileReport> {
        match self.reconciler.reconcile_library(&mut library) {
            Ok(report) => {
                self.start_watching(&library);
                Some(report)
            }
            Err(e) => {
                error!("Error scanning library {}: {}", library.name, e);
                None
            }
        }
    }

    fn start_watching(&self, library: &Library) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("Coordinator stopped, not watching library {}", library.name);
            return;
        }
        let handler = Arc::new(LibraryChangeHandler::new(
            library.clone(),
            Arc::clone(&self.reconciler),
            self.debouncer.clone(),
        ));
        let handle = match MonitorHandle::start(library, handler) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Could not start watching library {}: {}", library.name, e);
                return;
            }
        };

        // Concurrent scans of one library race here; whichever monitor loses is closed
        if let Some(previous) = self.monitors.insert(library.id, handle) {
            previous.close();
        }

        // Shutdown or delete may have run while the scan was in flight
        if self.stopped.load(Ordering::SeqCst) || !self.is_registered(library.id) {
            if let Some((_, handle)) = self.monitors.remove(&library.id) {
                handle.close();
            }
            info!("Dropped monitor of library {} after it was stopped", library.name);
        }
    }

    fn is_registered(&self, library_id: LibraryId) -> bool {
        match self.registry.get_library(library_id) {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!("Failed to check library {}: {}", library_id, e);
                true
            }
        }
    }
}

struct ScanGuard<'a>(&'a AtomicUsize);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
