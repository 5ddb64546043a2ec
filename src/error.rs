//! Error types for the media indexer

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur while indexing or watching a library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanErrorKind {
    /// Library root is missing or is not a directory
    PathUnavailable,
    /// Permission denied when accessing a file or directory
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// I/O error during file operations
    IoError,
    /// Registry or catalog operation failed
    DatabaseError,
    /// Filesystem watch could not be created
    SubscriptionError,
    /// Invalid path encoding
    InvalidPath,
    /// Rejected request parameters
    InvalidInput,
}

/// Represents an error that occurred during scanning
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct ScanError {
    /// The kind of error
    pub kind: ScanErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// Create a new scan error
    pub fn new(kind: ScanErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a path unavailable error for a library root
    pub fn path_unavailable(path: PathBuf) -> Self {
        Self::new(
            ScanErrorKind::PathUnavailable,
            Some(path.clone()),
            format!("Library root does not exist or is not a directory: {:?}", path),
        )
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::IoError, path, message)
    }

    /// Create a database error
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::DatabaseError, None, message)
    }

    /// Create a subscription error
    pub fn subscription_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::SubscriptionError, Some(path), message)
    }

    /// Create an invalid path error
    pub fn invalid_path(path: PathBuf) -> Self {
        Self::new(
            ScanErrorKind::InvalidPath,
            Some(path.clone()),
            format!("Path is not valid UTF-8: {:?}", path),
        )
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::InvalidInput, None, message)
    }

    /// Attach a path to an error that does not carry one yet
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    /// Whether this error means the file vanished underneath us
    pub fn is_not_found(&self) -> bool {
        self.kind == ScanErrorKind::NotFound
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ScanErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => ScanErrorKind::NotFound,
            _ => ScanErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<walkdir::Error> for ScanError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        let kind = match err.io_error().map(|e| e.kind()) {
            Some(std::io::ErrorKind::PermissionDenied) => ScanErrorKind::PermissionDenied,
            Some(std::io::ErrorKind::NotFound) => ScanErrorKind::NotFound,
            _ => ScanErrorKind::IoError,
        };
        Self::new(kind, path, err.to_string())
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(err: rusqlite::Error) -> Self {
        Self::database_error(err.to_string())
    }
}

impl From<notify::Error> for ScanError {
    fn from(err: notify::Error) -> Self {
        let path = err.paths.first().cloned();
        Self::new(ScanErrorKind::SubscriptionError, path, err.to_string())
    }
}
