//! Persistence interfaces the scanner talks to
//!
//! The scanner never touches SQL directly; it goes through these traits so the
//! coordinator can be wired to any registry/catalog pair. [`crate::db::SqliteStore`]
//! implements both.

use crate::error::Result;
use crate::models::{CatalogEntry, Library, LibraryId};

/// Stores library records
pub trait LibraryRegistry: Send + Sync {
    /// All registered libraries
    fn list_libraries(&self) -> Result<Vec<Library>>;

    /// Look up one library
    fn get_library(&self, id: LibraryId) -> Result<Option<Library>>;

    /// Register a new library with status OK
    fn create_library(&self, name: &str, root_path: &str) -> Result<Library>;

    /// Persist a library record (the scanner only changes `status`)
    fn save_library(&self, library: &Library) -> Result<Library>;

    /// Remove a library and its catalog entries
    fn delete_library(&self, id: LibraryId) -> Result<()>;
}

/// Stores catalog entries
pub trait Catalog: Send + Sync {
    /// All entries of a library
    fn find_by_library(&self, library_id: LibraryId) -> Result<Vec<CatalogEntry>>;

    /// The entry for an absolute path within a library
    fn find_by_path(&self, library_id: LibraryId, path: &str) -> Result<Option<CatalogEntry>>;

    /// Insert (when `id` is `None`) or update an entry, returning the stored row.
    ///
    /// Inserting a path the library already has updates that row instead, so a
    /// debounced write racing a full scan never produces a duplicate.
    fn save(&self, entry: &CatalogEntry) -> Result<CatalogEntry>;

    /// Remove an entry
    fn delete(&self, entry: &CatalogEntry) -> Result<()>;
}
