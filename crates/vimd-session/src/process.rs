//! Process liveness checks and safe termination.
//!
//! Registry entries can outlive the process they describe, after which the OS
//! may hand the PID to an unrelated program. [`ProcessGuard`] therefore checks
//! the command name of a process before sending it any signal.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Default wait after SIGTERM before escalating to SIGKILL.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Wait after SIGKILL before giving up.
const KILL_WAIT: Duration = Duration::from_millis(500);

/// Interval between liveness polls while waiting for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Program name every vimd process answers to.
const PROGRAM_NAME: &str = "vimd";

/// Reason a termination attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// PID 0 or a value the OS cannot represent.
    #[error("Invalid PID: {0}")]
    InvalidPid(u32),
    /// Not allowed to signal the process.
    #[error("Permission denied signalling PID {0}")]
    PermissionDenied(u32),
    /// Sending a signal failed for another reason.
    #[error("Failed to send {signal} to PID {pid}: {source}")]
    Signal {
        /// Target process.
        pid: u32,
        /// Signal name.
        signal: &'static str,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
    /// Still running after SIGKILL.
    #[error("PID {0} is still alive after SIGKILL")]
    StillAlive(u32),
    /// Process control is not implemented on this platform.
    #[error("Process control is not supported on this platform")]
    Unsupported,
}

/// Checks liveness and identity of processes, and terminates them.
#[derive(Clone, Debug)]
pub struct ProcessGuard {
    expected_names: Vec<String>,
    grace_period: Duration,
}

impl Default for ProcessGuard {
    /// Guard accepting `vimd` and the running executable's own name.
    fn default() -> Self {
        let current = std::env::current_exe()
            .ok()
            .as_deref()
            .and_then(Path::file_stem)
            .map(|stem| stem.to_string_lossy().into_owned());

        Self::new([Some(PROGRAM_NAME.to_owned()), current].into_iter().flatten())
    }
}

impl ProcessGuard {
    /// Create a guard that accepts processes whose command name contains any
    /// of `expected_names` (case-insensitive).
    #[must_use]
    pub fn new<I, S>(expected_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut expected_names: Vec<String> = expected_names
            .into_iter()
            .map(|name| name.into().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        expected_names.dedup();

        Self {
            expected_names,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Set how long to wait after SIGTERM before sending SIGKILL.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Non-destructive liveness probe. See [`is_process_alive`].
    pub fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }

    /// Check that `pid` currently runs a program this guard expects.
    ///
    /// Returns `false` when the process is gone or its name can't be read.
    pub fn verify_identity(&self, pid: u32) -> bool {
        let Some(name) = process_name(pid) else {
            return false;
        };
        let name = name.to_lowercase();
        let matched = self
            .expected_names
            .iter()
            .any(|expected| name.contains(expected.as_str()));

        if !matched {
            tracing::debug!(pid, name = %name, expected = ?self.expected_names, "Process identity mismatch");
        }
        matched
    }

    /// Terminate `pid`, returning whether it is confirmed gone.
    ///
    /// Failures are logged with their reason and reported as `false`.
    pub fn terminate(&self, pid: u32) -> bool {
        match self.try_terminate(pid) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(pid, %reason, "Failed to terminate process");
                false
            }
        }
    }

    /// Send SIGTERM, wait for the grace period, then escalate to SIGKILL.
    ///
    /// A process that is already gone counts as terminated.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessError`] describing why the process could not be
    /// confirmed gone.
    pub fn try_terminate(&self, pid: u32) -> Result<(), ProcessError> {
        if !is_process_alive(pid) {
            sys::raw_pid(pid).ok_or(ProcessError::InvalidPid(pid))?;
            return Ok(());
        }

        if !sys::signal(pid, sys::Signal::Term)? {
            return Ok(());
        }
        if wait_for_exit(pid, self.grace_period) {
            tracing::debug!(pid, "Process exited after SIGTERM");
            return Ok(());
        }

        tracing::debug!(pid, "Process ignored SIGTERM, sending SIGKILL");
        if !sys::signal(pid, sys::Signal::Kill)? {
            return Ok(());
        }
        if wait_for_exit(pid, KILL_WAIT) {
            Ok(())
        } else {
            Err(ProcessError::StillAlive(pid))
        }
    }
}

/// Poll until `pid` is gone or `timeout` elapses. Returns `true` if gone.
fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Check whether `pid` refers to a running process.
///
/// Never fails: absent, inaccessible and zombie processes all report `false`,
/// as do PID 0 and values the OS cannot represent.
pub fn is_process_alive(pid: u32) -> bool {
    sys::is_alive(pid)
}

/// Command name of `pid`, if it can be read.
pub fn process_name(pid: u32) -> Option<String> {
    sys::process_name(pid)
}

#[cfg(unix)]
mod sys {
    use std::io;

    use super::ProcessError;

    #[derive(Clone, Copy)]
    pub(super) enum Signal {
        Term,
        Kill,
    }

    impl Signal {
        fn raw(self) -> libc::c_int {
            match self {
                Self::Term => libc::SIGTERM,
                Self::Kill => libc::SIGKILL,
            }
        }

        fn name(self) -> &'static str {
            match self {
                Self::Term => "SIGTERM",
                Self::Kill => "SIGKILL",
            }
        }
    }

    /// Convert to a positive `pid_t`. PID 0 would address the process group.
    pub(super) fn raw_pid(pid: u32) -> Option<libc::pid_t> {
        libc::pid_t::try_from(pid).ok().filter(|raw| *raw > 0)
    }

    pub(super) fn is_alive(pid: u32) -> bool {
        let Some(raw) = raw_pid(pid) else {
            return false;
        };
        // SAFETY: signal 0 only performs the existence and permission checks.
        let exists = unsafe { libc::kill(raw, 0) } == 0;
        exists && !is_zombie(pid)
    }

    /// Send `signal`. Returns `Ok(false)` if the process vanished first.
    pub(super) fn signal(pid: u32, signal: Signal) -> Result<bool, ProcessError> {
        let raw = raw_pid(pid).ok_or(ProcessError::InvalidPid(pid))?;
        // SAFETY: `raw` is a positive pid; kill has no memory-safety preconditions.
        if unsafe { libc::kill(raw, signal.raw()) } == 0 {
            return Ok(true);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(false),
            Some(libc::EPERM) => Err(ProcessError::PermissionDenied(pid)),
            _ => Err(ProcessError::Signal {
                pid,
                signal: signal.name(),
                source: err,
            }),
        }
    }

    #[cfg(target_os = "linux")]
    fn is_zombie(pid: u32) -> bool {
        // Format: "pid (comm) state ...". comm may contain spaces and parens.
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                stat.rsplit_once(')')
                    .map(|(_, rest)| rest.trim_start().starts_with('Z'))
            })
            .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    fn is_zombie(pid: u32) -> bool {
        with_process(pid, |process| process.status() == sysinfo::ProcessStatus::Zombie)
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    pub(super) fn process_name(pid: u32) -> Option<String> {
        raw_pid(pid)?;
        let comm = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
        let comm = comm.trim();
        (!comm.is_empty()).then(|| comm.to_owned())
    }

    #[cfg(not(target_os = "linux"))]
    pub(super) fn process_name(pid: u32) -> Option<String> {
        let name = with_process(pid, |process| process.name().to_string_lossy().into_owned())?;
        (!name.is_empty()).then_some(name)
    }

    /// Look up a single process without scanning the whole table.
    #[cfg(not(target_os = "linux"))]
    fn with_process<T>(pid: u32, read: impl FnOnce(&sysinfo::Process) -> T) -> Option<T> {
        use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

        raw_pid(pid)?;
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system.process(pid).map(read)
    }
}

#[cfg(not(unix))]
mod sys {
    use super::ProcessError;

    #[derive(Clone, Copy)]
    pub(super) enum Signal {
        Term,
        Kill,
    }

    pub(super) fn raw_pid(pid: u32) -> Option<u32> {
        (pid > 0).then_some(pid)
    }

    pub(super) fn is_alive(_pid: u32) -> bool {
        false
    }

    pub(super) fn signal(_pid: u32, _signal: Signal) -> Result<bool, ProcessError> {
        Err(ProcessError::Unsupported)
    }

    pub(super) fn process_name(_pid: u32) -> Option<String> {
        None
    }
}
