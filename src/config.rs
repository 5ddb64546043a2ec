//! Configuration for the media indexer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of library scans that may run at once
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default quiescence window before a changed file is re-indexed (milliseconds)
pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;

/// Default catalog database file
pub const DEFAULT_DB_PATH: &str = "media_indexer.db";

/// Configuration for the scanner and its watchers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Database path for the registry and catalog
    pub db_path: PathBuf,

    /// Number of worker threads for library scans
    /// 0 means auto-detect (CPU cores)
    pub worker_threads: usize,

    /// Delay after the last change notification for a path before it is re-indexed
    pub debounce_ms: u64,

    /// Whether the directory walk follows symbolic links
    pub follow_links: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            worker_threads: DEFAULT_WORKER_THREADS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            follow_links: false,
        }
    }
}

impl ScanConfig {
    /// Create a config builder
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::new()
    }

    /// Get the effective number of worker threads
    pub fn effective_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(DEFAULT_WORKER_THREADS)
        } else {
            self.worker_threads
        }
    }

    /// Get the debounce window as a duration
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Builder for ScanConfig
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database path
    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = path;
        self
    }

    /// Set the number of worker threads
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads;
        self
    }

    /// Set the debounce window in milliseconds
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    /// Enable or disable following symlinks during the walk
    pub fn follow_links(mut self, enabled: bool) -> Self {
        self.config.follow_links = enabled;
        self
    }

    /// Build the config
    pub fn build(self) -> ScanConfig {
        self.config
    }
}
