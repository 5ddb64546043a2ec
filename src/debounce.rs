//! Per-path debouncing of change notifications
//!
//! Editors and copy tools emit several modify events per logical write. Each
//! [`Debouncer::schedule`] call for a path cancels the task already pending
//! for it and arms a fresh one, so only the last event in a burst reaches the
//! catalog, one quiescence window after it arrived.
//!
//! All actions run on a single runner thread, one at a time.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use log::{debug, error};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{Result, ScanError};

/// Work run once a path has been quiet for the whole window
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Registration of the task currently armed for a path
#[derive(Debug)]
struct PendingTask {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

/// Task queued on the runner
struct ScheduledTask {
    id: u64,
    deadline: Instant,
    path: PathBuf,
    cancelled: Arc<AtomicBool>,
    action: Action,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    // Reversed so the max-heap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct Shared {
    window: Duration,
    pending: DashMap<PathBuf, PendingTask>,
    next_id: AtomicU64,
    sender: Mutex<Option<Sender<ScheduledTask>>>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the debounce runner. Cloning shares the same runner and pending map.
#[derive(Clone)]
pub struct Debouncer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("window", &self.shared.window)
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl Debouncer {
    /// Start a runner thread with the given quiescence window
    pub fn new(window: Duration) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            window,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            sender: Mutex::new(Some(tx)),
            runner: Mutex::new(None),
        });

        let runner_shared = Arc::downgrade(&shared);
        let handle = std::thread::Builder::new()
            .name("debounce-runner".to_string())
            .spawn(move || run(rx, runner_shared))
            .map_err(|e| ScanError::io_error(None, format!("Failed to start debounce runner: {}", e)))?;
        *shared.runner.lock() = Some(handle);

        Ok(Self { shared })
    }

    /// Arm `action` for `path`, replacing whatever was pending for it.
    ///
    /// Does nothing once the debouncer has been shut down.
    pub fn schedule(&self, path: PathBuf, action: Action) {
        let sender = match self.shared.sender.lock().clone() {
            Some(sender) => sender,
            None => {
                debug!("Debouncer stopped, dropping change for {}", path.display());
                return;
            }
        };

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let previous = self.shared.pending.insert(
            path.clone(),
            PendingTask {
                id,
                cancelled: Arc::clone(&cancelled),
            },
        );
        if let Some(previous) = previous {
            previous.cancelled.store(true, Ordering::Release);
            debug!("Superseded pending change for {}", path.display());
        }

        let task = ScheduledTask {
            id,
            deadline: Instant::now() + self.shared.window,
            path,
            cancelled,
            action,
        };
        if let Err(err) = sender.send(task) {
            // Runner is gone; forget the registration we just made
            let task = err.into_inner();
            self.shared.pending.remove_if(&task.path, |_, p| p.id == task.id);
        }
    }

    /// Cancel the task pending for `path`, if any. Returns whether one was pending.
    pub fn cancel(&self, path: &PathBuf) -> bool {
        match self.shared.pending.remove(path) {
            Some((_, task)) => {
                task.cancelled.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Number of paths with a task waiting to run
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Stop the runner. Queued tasks are dropped without running.
    pub fn shutdown(&self) {
        let sender = self.shared.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        for entry in self.shared.pending.iter() {
            entry.cancelled.store(true, Ordering::Release);
        }
        self.shared.pending.clear();

        let runner = self.shared.runner.lock().take();
        if let Some(handle) = runner {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                error!("Debounce runner panicked");
            }
        }
    }
}

/// Runner loop: sleep until the earliest deadline, run what is due, repeat
fn run(rx: Receiver<ScheduledTask>, shared: std::sync::Weak<Shared>) {
    let mut queue: BinaryHeap<ScheduledTask> = BinaryHeap::new();

    loop {
        let received = match queue.peek() {
            Some(next) => {
                let wait = next.deadline.saturating_duration_since(Instant::now());
                rx.recv_timeout(wait)
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        // Run due tasks even when a message arrived
        match received {
            Ok(task) => queue.push(task),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if !queue.is_empty() {
                    debug!("Debounce runner stopping, dropping {} queued tasks", queue.len());
                }
                return;
            }
        }

        let now = Instant::now();
        while queue.peek().is_some_and(|next| next.deadline <= now) {
            let Some(task) = queue.pop() else { break };
            if task.cancelled.load(Ordering::Acquire) {
                continue;
            }

            if let Some(shared) = shared.upgrade() {
                shared.pending.remove_if(&task.path, |_, p| p.id == task.id);
            }

            let path = task.path;
            if catch_unwind(AssertUnwindSafe(task.action)).is_err() {
                error!("Debounced action for {} panicked", path.display());
            }
        }
    }
}
