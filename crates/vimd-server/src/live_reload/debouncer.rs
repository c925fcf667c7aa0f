//! Trailing-edge debounce state for a single watched file.
//!
//! Editors emit several events per save (truncate, write, rename, chmod).
//! Each recorded change pushes the deadline back, so a burst yields one
//! change once the file has been quiet for the debounce period.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// The change waiting to be emitted.
struct Pending {
    path: PathBuf,
    deadline: Instant,
}

/// Thread-safe single-slot debouncer.
pub(crate) struct ChangeTimer {
    pending: Mutex<Option<Pending>>,
    debounce: Duration,
}

impl ChangeTimer {
    pub(crate) fn new(debounce: Duration) -> Self {
        Self {
            pending: Mutex::new(None),
            debounce,
        }
    }

    /// Record a change, replacing any pending one and restarting the delay.
    pub(crate) fn record(&self, path: PathBuf) {
        self.record_at(path, Instant::now());
    }

    fn record_at(&self, path: PathBuf, now: Instant) {
        *self.lock() = Some(Pending {
            path,
            deadline: now + self.debounce,
        });
    }

    /// Take the pending change if its deadline has passed.
    pub(crate) fn take_ready(&self) -> Option<PathBuf> {
        self.take_ready_at(Instant::now())
    }

    fn take_ready_at(&self, now: Instant) -> Option<PathBuf> {
        let mut pending = self.lock();
        if pending.as_ref().is_some_and(|p| p.deadline <= now) {
            pending.take().map(|p| p.path)
        } else {
            None
        }
    }

    /// Deadline of the pending change, for timer scheduling.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.lock().as_ref().map(|p| p.deadline)
    }

    /// Drop the pending change.
    pub(crate) fn cancel(&self) {
        self.lock().take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
