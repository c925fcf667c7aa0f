//! Advisory file lock guarding registry read-modify-write cycles.
//!
//! Uses `flock(2)` on a sibling `.lock` file. The lock is released when the
//! [`RegistryLock`] is dropped (closing the descriptor releases it).

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// A held exclusive lock.
pub(crate) struct RegistryLock {
    _file: File,
}

impl RegistryLock {
    /// Block until an exclusive lock on `lock_path` is acquired.
    pub(crate) fn acquire(lock_path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        lock_exclusive(&file)?;
        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        // SAFETY: flock is safe to call with a valid file descriptor
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}
