//! Video library indexer with live filesystem synchronization
//!
//! Libraries are root directories whose video files are recorded in a
//! catalog. A full walk reconciles each library with its catalog entries, and
//! a filesystem monitor keeps the catalog current afterwards, debouncing
//! bursts of change notifications per path.

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod debounce;
pub mod error;
pub mod models;
pub mod monitor;
pub mod reconciler;
pub mod service;
pub mod store;

pub use classifier::is_media_file;
pub use config::ScanConfig;
pub use coordinator::ScanCoordinator;
pub use db::SqliteStore;
pub use debounce::Debouncer;
pub use error::{ScanError, ScanErrorKind};
pub use models::{CatalogEntry, FileOutcome, Library, LibraryId, LibraryStatus, ReconcileReport};
pub use monitor::{ChangeEvent, ChangeHandler, ChangeKind, LibraryChangeHandler, MonitorHandle};
pub use reconciler::Reconciler;
pub use service::LibraryService;
pub use store::{Catalog, LibraryRegistry};
