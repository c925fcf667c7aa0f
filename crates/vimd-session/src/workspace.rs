//! Per-session temporary directories.
//!
//! Each preview session writes its HTML artifact into its own directory under
//! `<temp dir>/vimd/`, named `session-<unix millis>-<id>`. The timestamp in the
//! name lets later sessions sweep directories abandoned by crashed processes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::registry::BASE_DIR_NAME;

/// Prefix of every session directory name.
const SESSION_PREFIX: &str = "session-";

/// Session directories older than this are removed on the next
/// [`SessionDir::create`].
pub const MAX_SESSION_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Shared base directory: `<temp dir>/vimd`.
#[must_use]
pub fn default_base_dir() -> PathBuf {
    std::env::temp_dir().join(BASE_DIR_NAME)
}

/// A session's private temporary directory.
#[derive(Debug)]
pub struct SessionDir {
    base: PathBuf,
    path: PathBuf,
}

impl SessionDir {
    /// Create a session directory under [`default_base_dir`].
    pub fn create() -> io::Result<Self> {
        Self::create_in(&default_base_dir())
    }

    /// Create a session directory under `base`, first removing stale
    /// session directories.
    pub fn create_in(base: &Path) -> io::Result<Self> {
        fs::create_dir_all(base)?;
        cleanup_old(base, MAX_SESSION_AGE, SystemTime::now());

        let path = base.join(session_dir_name(SystemTime::now()));
        fs::create_dir_all(&path)?;
        tracing::debug!(path = %path.display(), "Created session directory");

        Ok(Self {
            base: base.to_path_buf(),
            path,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the HTML artifact for `source`: `<dir>/<source stem>.html`.
    #[must_use]
    pub fn artifact_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map_or_else(|| "index".into(), |stem| stem.to_string_lossy());
        self.path.join(format!("{stem}.html"))
    }

    /// Delete the directory and its contents.
    ///
    /// Refuses to touch anything outside the base directory. Failures are
    /// logged, never returned.
    pub fn remove(self) {
        if !is_within(&self.path, &self.base) {
            tracing::warn!(path = %self.path.display(), "Refusing to remove directory outside the session base");
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove session directory");
        }
    }
}

/// Remove session directories in `base` whose embedded timestamp is older
/// than `max_age` relative to `now`. Returns the number removed.
///
/// Entries that are not session directories are left alone.
pub fn cleanup_old(base: &Path, max_age: Duration, now: SystemTime) -> usize {
    let Ok(entries) = fs::read_dir(base) else {
        return 0;
    };
    let now_millis = unix_millis(now);
    let max_age_millis = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);

    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_type().is_ok_and(|kind| kind.is_dir()) {
            continue;
        }
        let name = entry.file_name();
        let Some(created) = name.to_str().and_then(session_timestamp) else {
            continue;
        };
        if now_millis.saturating_sub(created) <= max_age_millis {
            continue;
        }

        match fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                tracing::info!(name = %name.to_string_lossy(), "Cleaned up old session");
                removed += 1;
            }
            Err(e) => {
                tracing::debug!(name = %name.to_string_lossy(), error = %e, "Failed to clean up old session");
            }
        }
    }
    removed
}

fn session_dir_name(now: SystemTime) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{SESSION_PREFIX}{}-{}", unix_millis(now), &id[..6])
}

/// Creation time in unix millis parsed from `session-<millis>-<id>`.
fn session_timestamp(name: &str) -> Option<u64> {
    let rest = name.strip_prefix(SESSION_PREFIX)?;
    let (millis, _) = rest.split_once('-')?;
    millis.parse().ok()
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// Lexical containment check; both paths are canonicalized when possible.
fn is_within(path: &Path, base: &Path) -> bool {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    path != base && path.starts_with(&base)
}
