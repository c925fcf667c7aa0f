//! Debounced change notification for a single source file.
//!
//! The containing directory is watched rather than the file itself, so saves
//! that replace the file (write to a temp file, then rename) keep being seen.
//! Raw events go into a [`ChangeTimer`]; a worker thread fires the registered
//! callbacks once the file has been quiet for the debounce period.

use std::ffi::OsString;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::debouncer::ChangeTimer;
use crate::error::WatchError;

/// Longest the worker sleeps between shutdown checks.
const IDLE_POLL: Duration = Duration::from_millis(50);

type Callback = Arc<dyn Fn(&Path) + Send + Sync>;

/// State shared by the debouncer, its notify callback and its worker.
struct Inner {
    timer: ChangeTimer,
    callbacks: Mutex<Vec<Callback>>,
    stopped: AtomicBool,
}

impl Inner {
    /// Run callbacks in registration order. A panicking callback is logged
    /// and does not prevent the rest from running.
    fn fire(&self, path: &Path) {
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        tracing::debug!(path = %path.display(), callbacks = callbacks.len(), "Source changed");
        for callback in callbacks {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(path))).is_err() {
                tracing::warn!(path = %path.display(), "Change callback panicked");
            }
        }
    }
}

/// Watches one file and reports debounced changes.
///
/// Dropping the debouncer stops it.
pub struct ChangeDebouncer {
    inner: Arc<Inner>,
    watcher: Option<RecommendedWatcher>,
    shutdown: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ChangeDebouncer {
    /// Create a debouncer that is not attached to the filesystem.
    ///
    /// Changes are fed with [`Self::record_change`].
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        let inner = Arc::new(Inner {
            timer: ChangeTimer::new(debounce),
            callbacks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });
        let (shutdown_tx, shutdown_rx) = mpsc::channel();

        let worker_inner = Arc::clone(&inner);
        let worker = thread::spawn(move || run_worker(&worker_inner, &shutdown_rx));

        Self {
            inner,
            watcher: None,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        }
    }

    /// Watch `path` for content changes.
    ///
    /// Only create and modify events for `path`'s file name count. Events
    /// whose path, relative to the watched directory, matches one of
    /// `ignored` (glob syntax) are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError`] if `path` has no file name, a pattern is
    /// invalid, or the watcher can't be attached.
    pub fn watch(path: &Path, debounce: Duration, ignored: &[String]) -> Result<Self, WatchError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| WatchError::NotAFile(path.to_path_buf()))?
            .to_owned();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let ignored = ignored
            .iter()
            .map(|pattern| {
                glob::Pattern::new(pattern).map_err(|source| WatchError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut debouncer = Self::new(debounce);
        let filter = EventFilter {
            file_name,
            dir: dir.clone(),
            ignored,
        };
        let inner = Arc::clone(&debouncer.inner);

        let notify_error = |source| WatchError::Notify {
            path: dir.clone(),
            source,
        };
        let mut watcher = notify::recommended_watcher(move |res| {
            record_notify_event(res, &filter, &inner);
        })
        .map_err(notify_error)?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(notify_error)?;

        tracing::info!(path = %path.display(), debounce_ms = debounce.as_millis(), "Watching source file");
        debouncer.watcher = Some(watcher);
        Ok(debouncer)
    }

    /// Register a callback for debounced changes. Callbacks run on the
    /// debouncer's worker thread, in registration order.
    pub fn on_change(&self, callback: impl Fn(&Path) + Send + Sync + 'static) {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Record a raw change event. Ignored once stopped.
    pub fn record_change(&self, path: impl Into<PathBuf>) {
        record(&self.inner, path.into());
    }

    /// Whether [`Self::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stop watching and cancel any pending notification.
    ///
    /// Waits for a running callback to finish, so no callback runs after
    /// this returns. Calling it again is a no-op.
    pub fn stop(&mut self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.timer.cancel();
        self.watcher.take();
        self.shutdown.take();

        if let Some(worker) = self.worker.take() {
            // Joining our own thread would deadlock
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                tracing::warn!("Debounce worker panicked");
            }
        }
    }
}

impl Drop for ChangeDebouncer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Which notify events belong to the watched file.
struct EventFilter {
    file_name: OsString,
    dir: PathBuf,
    ignored: Vec<glob::Pattern>,
}

impl EventFilter {
    fn accepts(&self, path: &Path) -> bool {
        if path.file_name() != Some(self.file_name.as_os_str()) {
            return false;
        }
        let relative = path.strip_prefix(&self.dir).unwrap_or(path);
        !self
            .ignored
            .iter()
            .any(|pattern| pattern.matches_path(relative) || pattern.matches_path(path))
    }
}

fn record_notify_event(res: notify::Result<Event>, filter: &EventFilter, inner: &Inner) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "File watcher error");
            return;
        }
    };

    match event.kind {
        EventKind::Create(_) => {}
        EventKind::Modify(kind) if !matches!(kind, ModifyKind::Metadata(_)) => {}
        _ => return,
    }

    for path in event.paths {
        if filter.accepts(&path) {
            tracing::debug!(path = %path.display(), kind = ?event.kind, "Recorded filesystem event");
            record(inner, path);
        }
    }
}

fn record(inner: &Inner, path: PathBuf) {
    if !inner.stopped.load(Ordering::SeqCst) {
        inner.timer.record(path);
    }
}

/// Fire callbacks whenever the pending change matures, until shutdown.
fn run_worker(inner: &Inner, shutdown_rx: &mpsc::Receiver<()>) {
    loop {
        let wait = inner.timer.next_deadline().map_or(IDLE_POLL, |deadline| {
            deadline
                .saturating_duration_since(Instant::now())
                .min(IDLE_POLL)
        });

        match shutdown_rx.recv_timeout(wait) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        if let Some(path) = inner.timer.take_ready() {
            inner.fire(&path);
        }
    }
}
