//! Filesystem change monitoring for one library root
//!
//! A [`MonitorHandle`] owns a recursive `notify` watcher on the library root
//! and a dedicated thread that blocks on its events. Raw notifications are
//! reduced to [`ChangeEvent`]s and handed to a [`ChangeHandler`]. Closing the
//! handle stops the thread and releases the OS watch.

use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, error, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::classifier::is_media_file;
use crate::debounce::Debouncer;
use crate::error::{Result, ScanError};
use crate::models::{Library, LibraryId};
use crate::reconciler::{resolve_root, Reconciler};

/// Kind of filesystem change the scanner reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A path appeared
    Create,
    /// A path's content or attributes changed
    Modify,
    /// A path went away
    Delete,
}

/// One change to one absolute path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened
    pub kind: ChangeKind,
    /// Absolute path it happened to
    pub path: PathBuf,
}

impl ChangeEvent {
    fn new(kind: ChangeKind, path: &Path) -> Self {
        Self {
            kind,
            path: resolve_root(path),
        }
    }
}

/// Reduce a raw notification to the changes the scanner cares about.
///
/// Renames become a delete of the old name and a create of the new one.
/// Access and other informational events are dropped.
pub fn classify(event: &Event) -> Vec<ChangeEvent> {
    let all = |kind: ChangeKind| {
        event
            .paths
            .iter()
            .map(|p| ChangeEvent::new(kind, p))
            .collect::<Vec<_>>()
    };

    match &event.kind {
        EventKind::Create(_) => all(ChangeKind::Create),
        EventKind::Remove(_) => all(ChangeKind::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeKind::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(ChangeKind::Create),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            ChangeEvent::new(ChangeKind::Delete, &event.paths[0]),
            ChangeEvent::new(ChangeKind::Create, &event.paths[1]),
        ],
        EventKind::Modify(_) | EventKind::Any => all(ChangeKind::Modify),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

/// Receives the changes observed by a monitor
pub trait ChangeHandler: Send + Sync {
    /// Called on the monitor thread for every change, in arrival order
    fn handle(&self, change: ChangeEvent);
}

/// Applies changes to one library's catalog.
///
/// Deletions hit the catalog immediately; creations and modifications are
/// debounced and then re-read from disk.
pub struct LibraryChangeHandler {
    library: Library,
    reconciler: Arc<Reconciler>,
    debouncer: Debouncer,
}

impl LibraryChangeHandler {
    /// Create a handler for a library
    pub fn new(library: Library, reconciler: Arc<Reconciler>, debouncer: Debouncer) -> Self {
        Self {
            library,
            reconciler,
            debouncer,
        }
    }
}

impl ChangeHandler for LibraryChangeHandler {
    fn handle(&self, change: ChangeEvent) {
        debug!("{:?} {}", change.kind, change.path.display());
        match change.kind {
            ChangeKind::Delete => {
                if let Err(e) = self.reconciler.remove_path(&self.library, &change.path) {
                    error!("Failed to remove {}: {}", change.path.display(), e);
                }
            }
            ChangeKind::Create | ChangeKind::Modify => {
                if !is_media_file(&change.path) {
                    return;
                }
                let library = self.library.clone();
                let reconciler = Arc::clone(&self.reconciler);
                let path = change.path.clone();
                self.debouncer.schedule(
                    change.path,
                    Box::new(move || {
                        if let Err(e) = reconciler.reconcile_path(&library, &path) {
                            error!("Error processing file {}: {}", path.display(), e);
                        }
                    }),
                );
            }
        }
    }
}

/// Live subscription to one library root
pub struct MonitorHandle {
    library_id: LibraryId,
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("library_id", &self.library_id)
            .field("root", &self.root)
            .field("active", &self.is_active())
            .finish()
    }
}

impl MonitorHandle {
    /// Watch `library`'s root recursively and feed changes to `handler`
    pub fn start(library: &Library, handler: Arc<dyn ChangeHandler>) -> Result<Self> {
        let root = resolve_root(library.root());
        let (event_tx, event_rx) = crossbeam_channel::unbounded();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = event_tx.send(res);
        })
        .map_err(|e| ScanError::from(e).with_path(root.clone()))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| ScanError::from(e).with_path(root.clone()))?;

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let name = library.name.clone();
        let thread = std::thread::Builder::new()
            .name(format!("monitor-{}", library.id))
            .spawn(move || listen(&name, event_rx, stop_rx, handler))
            .map_err(|e| ScanError::subscription_error(root.clone(), e.to_string()))?;

        info!("Started watching library: {}", library.name);
        Ok(Self {
            library_id: library.id,
            root,
            watcher: Some(watcher),
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Library this monitor belongs to
    pub fn library_id(&self) -> LibraryId {
        self.library_id
    }

    /// Watched root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the listening thread is still running
    pub fn is_active(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop listening and release the watch
    pub fn close(mut self) {
        self.stop_listening();
    }

    fn stop_listening(&mut self) {
        // Disconnecting the stop channel wakes the listener
        self.stop.take();
        self.watcher.take();

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                error!("Monitor thread for library {} panicked", self.library_id);
            }
            info!("Stopped watching library with id: {}", self.library_id);
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

fn listen(
    name: &str,
    events: Receiver<notify::Result<Event>>,
    stop: Receiver<()>,
    handler: Arc<dyn ChangeHandler>,
) {
    loop {
        select! {
            recv(events) -> msg => match msg {
                Ok(Ok(event)) => {
                    for change in classify(&event) {
                        handler.handle(change);
                    }
                }
                Ok(Err(e)) => warn!("Watch error on library {}: {}", name, e),
                Err(_) => {
                    debug!("Watch subscription closed for library {}", name);
                    break;
                }
            },
            recv(stop) -> _ => {
                debug!("Watch stop requested for library {}", name);
                break;
            }
        }
    }
}
