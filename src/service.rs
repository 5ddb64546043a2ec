//! Library management operations exposed to front ends

use log::info;
use std::sync::Arc;

use crate::coordinator::ScanCoordinator;
use crate::error::{Result, ScanError};
use crate::models::{CatalogEntry, Library, LibraryId};
use crate::store::{Catalog, LibraryRegistry};

/// Add, list, remove and rescan libraries.
///
/// Metadata operations return their errors; scans are queued on the
/// coordinator and never fail the caller.
pub struct LibraryService {
    registry: Arc<dyn LibraryRegistry>,
    catalog: Arc<dyn Catalog>,
    coordinator: Arc<ScanCoordinator>,
}

impl std::fmt::Debug for LibraryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryService")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl LibraryService {
    /// Create a service over the given stores and coordinator
    pub fn new(
        registry: Arc<dyn LibraryRegistry>,
        catalog: Arc<dyn Catalog>,
        coordinator: Arc<ScanCoordinator>,
    ) -> Self {
        Self {
            registry,
            catalog,
            coordinator,
        }
    }

    /// Register a library and queue its first scan
    pub fn add_library(&self, name: &str, root_path: &str) -> Result<Library> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScanError::invalid_input("Library name must not be empty"));
        }
        let library = self.registry.create_library(name, root_path)?;
        info!("Added library {} ({}) at {}", library.name, library.id, library.root_path);
        self.coordinator.dispatch(library.clone());
        Ok(library)
    }

    /// All registered libraries
    pub fn list_libraries(&self) -> Result<Vec<Library>> {
        self.registry.list_libraries()
    }

    /// Catalog entries of one library
    pub fn list_files(&self, library_id: LibraryId) -> Result<Vec<CatalogEntry>> {
        self.catalog.find_by_library(library_id)
    }

    /// Remove a library and its entries, then stop watching it.
    ///
    /// A scan still in flight sees the library gone and drops its monitor.
    pub fn delete_library(&self, library_id: LibraryId) -> Result<()> {
        self.registry.delete_library(library_id)?;
        self.coordinator.stop_watching(library_id);
        info!("Deleted library {}", library_id);
        Ok(())
    }

    /// Queue a rescan of one library
    pub fn scan_library(&self, library_id: LibraryId) {
        self.coordinator.scan_one(library_id);
    }

    /// Queue a rescan of every library
    pub fn scan_all_libraries(&self) {
        self.coordinator.scan_all();
    }

    /// The coordinator doing the scanning
    pub fn coordinator(&self) -> &Arc<ScanCoordinator> {
        &self.coordinator
    }
}
