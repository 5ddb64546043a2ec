//! Core data models for the media indexer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Library identifier assigned by the registry
pub type LibraryId = i64;

/// Health of a library root as seen by the last scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LibraryStatus {
    /// Root exists and is a directory
    #[default]
    Ok,
    /// Root was missing or not a directory
    Error,
}

impl LibraryStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryStatus::Ok => "ok",
            LibraryStatus::Error => "error",
        }
    }

    /// Parse the stored representation, treating anything unknown as an error state
    pub fn from_db(value: &str) -> Self {
        match value {
            "ok" | "OK" => LibraryStatus::Ok,
            _ => LibraryStatus::Error,
        }
    }
}

impl std::fmt::Display for LibraryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered root directory to be indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    /// Registry identifier
    pub id: LibraryId,
    /// Display name
    pub name: String,
    /// Root directory
    pub root_path: String,
    /// Health of the root at the last scan
    pub status: LibraryStatus,
}

impl Library {
    /// Root directory as a path
    pub fn root(&self) -> &Path {
        Path::new(&self.root_path)
    }
}

/// One indexed media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Catalog identifier, `None` until the entry has been saved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Owning library
    pub library_id: LibraryId,
    /// Absolute path of the file
    pub path: String,
    /// File name without directory
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch
    pub mtime: i64,
}

impl CatalogEntry {
    /// Create an unsaved entry for a file in a library
    pub fn new(library_id: LibraryId, path: &Path, size: u64, mtime: i64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: None,
            library_id,
            path: path.to_string_lossy().into_owned(),
            name,
            size,
            mtime,
        }
    }

    /// Whether the stored attributes differ from the given ones
    pub fn is_stale(&self, size: u64, mtime: i64) -> bool {
        self.size != size || self.mtime != mtime
    }
}

/// Convert a filesystem timestamp to catalog milliseconds
pub fn mtime_millis(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp_millis()
}

/// What a single-file reconciliation did to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    /// New entry inserted
    Added,
    /// Size or mtime updated
    Updated,
    /// Already up to date
    Unchanged,
}

/// Result of reconciling one library
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Library that was reconciled
    pub library_id: LibraryId,
    /// Media files found on disk
    pub total_files: u64,
    /// Directories traversed
    pub total_dirs: u64,
    /// Entries inserted
    pub added: u64,
    /// Entries whose size or mtime changed
    pub updated: u64,
    /// Entries already up to date
    pub unchanged: u64,
    /// Entries removed because their file is gone
    pub removed: u64,
    /// File writes that failed and were skipped
    pub failed_writes: u64,
    /// Paths of removed entries
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_paths: Vec<PathBuf>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl ReconcileReport {
    /// Create an empty report for a library
    pub fn new(library_id: LibraryId) -> Self {
        Self {
            library_id,
            ..Default::default()
        }
    }

    /// Count one file outcome
    pub fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Added => self.added += 1,
            FileOutcome::Updated => self.updated += 1,
            FileOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Number of catalog writes performed
    pub fn writes(&self) -> u64 {
        self.added + self.updated + self.removed
    }
}
