//! Cross-process session registry.
//!
//! Every running preview server records itself in a JSON file shared by all
//! vimd processes, keyed by port:
//!
//! ```text
//! {
//!   "38080": {
//!     "pid": 4242,
//!     "port": 38080,
//!     "htmlPath": "/tmp/vimd/session-1718000000000-a1b2c3/README.html",
//!     "sourcePath": "/home/me/project/README.md",
//!     "startedAt": "2024-06-10T08:00:00Z"
//!   }
//! }
//! ```
//!
//! The file is read and rewritten as a whole. Mutations hold an advisory lock
//! on a sibling `.lock` file for the read-modify-write window and replace the
//! file with an atomic rename. Reads never fail: a missing or corrupt file is
//! an empty registry, so a damaged registry can't block cleanup or startup.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lock::RegistryLock;
use crate::process::ProcessGuard;

/// Environment variable overriding the registry location.
pub const REGISTRY_PATH_ENV: &str = "VIMD_SESSIONS_FILE";

/// Directory under the system temp dir shared by all vimd processes.
pub(crate) const BASE_DIR_NAME: &str = "vimd";

/// Registry file name inside [`BASE_DIR_NAME`].
const REGISTRY_FILENAME: &str = "sessions.json";

/// A running preview server, as recorded in the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Process serving the preview.
    pub pid: u32,
    /// Port the preview is served on. Registry key.
    pub port: u16,
    /// Generated HTML artifact.
    pub html_path: PathBuf,
    /// Markdown source being previewed.
    pub source_path: PathBuf,
    /// When the session started.
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Describe a session served by the current process, starting now.
    #[must_use]
    pub fn for_current_process(port: u16, html_path: PathBuf, source_path: PathBuf) -> Self {
        Self {
            pid: std::process::id(),
            port,
            html_path,
            source_path,
            started_at: Utc::now(),
        }
    }
}

/// All sessions keyed by port.
pub type Sessions = BTreeMap<u16, Session>;

/// Registry write error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Writing the registry file failed.
    #[error("Failed to write session registry {}: {source}", .path.display())]
    Io {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Serializing the table failed.
    #[error("Failed to serialize session registry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why [`SessionRegistry::cleanup_on_port`] did not kill the recorded process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The recorded process had already exited.
    AlreadyDead,
    /// The PID now belongs to an unrelated program.
    IdentityMismatch,
    /// The PID is the calling process.
    CurrentProcess,
    /// Signals were sent but the process could not be confirmed gone.
    TerminationFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::AlreadyDead => "Process already dead",
            Self::IdentityMismatch => "PID reused by another process",
            Self::CurrentProcess => "Session belongs to this process",
            Self::TerminationFailed => "Process could not be terminated",
        };
        f.write_str(reason)
    }
}

/// Outcome of [`SessionRegistry::cleanup_on_port`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupResult {
    /// The recorded process was terminated.
    pub killed: bool,
    /// The HTML artifact was deleted.
    pub html_removed: bool,
    /// PID recorded for the port, if there was an entry.
    pub pid: Option<u32>,
    /// Source the previous session was previewing.
    pub previous_source: Option<PathBuf>,
    /// Why no kill happened, when an entry existed.
    pub skip_reason: Option<SkipReason>,
}

/// File-backed, cross-process table of running sessions.
#[derive(Clone, Debug)]
pub struct SessionRegistry {
    path: PathBuf,
    guard: ProcessGuard,
}

impl SessionRegistry {
    /// Create a registry stored at `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            guard: ProcessGuard::default(),
        }
    }

    /// Registry at [`Self::default_path`].
    #[must_use]
    pub fn open_default() -> Self {
        Self::new(Self::default_path())
    }

    /// Shared registry location: `$VIMD_SESSIONS_FILE`, or
    /// `<temp dir>/vimd/sessions.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::var_os(REGISTRY_PATH_ENV)
            .filter(|value| !value.is_empty())
            .map_or_else(
                || {
                    std::env::temp_dir()
                        .join(BASE_DIR_NAME)
                        .join(REGISTRY_FILENAME)
                },
                PathBuf::from,
            )
    }

    /// Use `guard` for liveness checks and termination.
    #[must_use]
    pub fn with_guard(mut self, guard: ProcessGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Registry file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all sessions.
    ///
    /// A missing file is an empty registry. Unreadable or unparsable content
    /// is logged and treated as empty; malformed entries are skipped.
    pub fn load_all(&self) -> Sessions {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Sessions::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read session registry");
                return Sessions::new();
            }
        };

        if content.trim().is_empty() {
            return Sessions::new();
        }

        let raw: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Session registry is corrupt, ignoring it");
                return Sessions::new();
            }
        };

        raw.into_iter()
            .filter_map(|(key, value)| match serde_json::from_value::<Session>(value) {
                Ok(session) => Some((session.port, session)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed session entry");
                    None
                }
            })
            .collect()
    }

    /// Session recorded for `port`.
    pub fn get(&self, port: u16) -> Option<Session> {
        self.load_all().remove(&port)
    }

    /// Insert or replace the entry for `session.port`.
    pub fn save(&self, session: &Session) -> Result<(), RegistryError> {
        self.update(|sessions| {
            sessions.insert(session.port, session.clone());
            ((), true)
        })
    }

    /// Delete the entry for `port`. Removing an absent entry is a no-op.
    pub fn remove(&self, port: u16) -> Result<(), RegistryError> {
        self.update(|sessions| ((), sessions.remove(&port).is_some()))
    }

    /// Remove every entry whose process is no longer alive, deleting its HTML
    /// artifact on a best-effort basis. Returns the number of entries removed.
    pub fn clean_dead(&self) -> Result<usize, RegistryError> {
        self.update(|sessions| {
            let before = sessions.len();
            sessions.retain(|port, session| {
                if self.guard.is_alive(session.pid) {
                    return true;
                }
                remove_artifact(&session.html_path);
                tracing::info!(port, pid = session.pid, "Removed dead session");
                false
            });
            let cleaned = before - sessions.len();
            (cleaned, cleaned > 0)
        })
    }

    /// Shut down the session recorded on `port`, if any.
    ///
    /// A live process is terminated only after its identity is verified, so a
    /// stale entry whose PID was reused never kills an unrelated program. The
    /// HTML artifact and the entry are removed whatever the kill outcome.
    pub fn cleanup_on_port(&self, port: u16) -> Result<CleanupResult, RegistryError> {
        let Some(session) = self.get(port) else {
            return Ok(CleanupResult::default());
        };

        let mut result = CleanupResult {
            pid: Some(session.pid),
            previous_source: Some(session.source_path.clone()),
            ..CleanupResult::default()
        };

        if session.pid == std::process::id() {
            result.skip_reason = Some(SkipReason::CurrentProcess);
        } else if !self.guard.is_alive(session.pid) {
            result.skip_reason = Some(SkipReason::AlreadyDead);
        } else if !self.guard.verify_identity(session.pid) {
            tracing::warn!(port, pid = session.pid, "Session PID belongs to another program, not killing it");
            result.skip_reason = Some(SkipReason::IdentityMismatch);
        } else if self.guard.terminate(session.pid) {
            result.killed = true;
        } else {
            result.skip_reason = Some(SkipReason::TerminationFailed);
        }

        result.html_removed = remove_artifact(&session.html_path);
        self.remove(port)?;

        Ok(result)
    }

    /// Run `mutate` on the current table under the registry lock, writing the
    /// table back when `mutate` reports a change.
    fn update<T>(
        &self,
        mutate: impl FnOnce(&mut Sessions) -> (T, bool),
    ) -> Result<T, RegistryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let _lock = match RegistryLock::acquire(&self.lock_path()) {
            Ok(lock) => Some(lock),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to lock session registry, continuing unlocked");
                None
            }
        };

        let mut sessions = self.load_all();
        let (value, changed) = mutate(&mut sessions);
        if changed {
            self.write_all(&sessions)?;
        }
        Ok(value)
    }

    /// Replace the registry file with `sessions`.
    fn write_all(&self, sessions: &Sessions) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(sessions)?;
        let tmp_path = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));

        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };
        fs::write(&tmp_path, json).map_err(io_err)?;
        fs::rename(&tmp_path, &self.path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            io_err(source)
        })
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_owned();
        name.push(".lock");
        self.path.with_file_name(name)
    }
}

/// Delete an HTML artifact. Returns `true` if a file was removed.
fn remove_artifact(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Failed to remove HTML artifact");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::process::{Child, Command};
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    use crate::process::is_process_alive;

    fn registry(dir: &TempDir) -> SessionRegistry {
        SessionRegistry::new(dir.path().join("vimd").join("sessions.json"))
    }

    fn session(pid: u32, port: u16, html_path: PathBuf) -> Session {
        Session {
            pid,
            port,
            html_path,
            source_path: PathBuf::from("/docs/README.md"),
            started_at: "2024-06-10T08:00:00Z".parse().unwrap(),
        }
    }

    /// A PID that is very unlikely to be in use.
    fn dead_pid() -> u32 {
        let mut pid = std::process::id() + 20_000;
        while is_process_alive(pid) {
            pid += 1;
        }
        pid
    }

    fn spawn_sleeper() -> Child {
        Command::new("sleep").arg("30").spawn().unwrap()
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(registry(&dir).load_all().is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        fs::write(registry.path(), "{ not json").unwrap();

        assert!(registry.load_all().is_empty());
    }

    #[test]
    fn test_load_skips_malformed_entries() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        fs::write(
            registry.path(),
            r#"{
  "38080": {"pid": 1, "port": 38080, "htmlPath": "/a.html", "sourcePath": "/a.md", "startedAt": "2024-06-10T08:00:00Z"},
  "38081": {"pid": "oops"}
}"#,
        )
        .unwrap();

        let sessions = registry.load_all();

        assert_eq!(sessions.keys().copied().collect::<Vec<_>>(), vec![38080]);
    }

    #[test]
    fn test_save_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let saved = session(4242, 38080, dir.path().join("a.html"));

        registry.save(&saved).unwrap();

        assert_eq!(registry.get(38080), Some(saved));
        assert_eq!(registry.get(38081), None);
    }

    #[test]
    fn test_save_writes_port_keyed_camel_case_json() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        registry
            .save(&session(4242, 38080, PathBuf::from("/tmp/a.html")))
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry.path()).unwrap()).unwrap();
        let entry = &json["38080"];
        assert_eq!(entry["pid"], 4242);
        assert_eq!(entry["port"], 38080);
        assert_eq!(entry["htmlPath"], "/tmp/a.html");
        assert_eq!(entry["sourcePath"], "/docs/README.md");
        assert_eq!(entry["startedAt"], "2024-06-10T08:00:00Z");
    }

    #[test]
    fn test_save_replaces_entry_on_same_port() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        registry
            .save(&session(1, 38080, PathBuf::from("/old.html")))
            .unwrap();
        registry
            .save(&session(2, 38080, PathBuf::from("/new.html")))
            .unwrap();

        let sessions = registry.load_all();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[&38080].pid, 2);
    }

    #[test]
    fn test_remove_deletes_entry() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        registry
            .save(&session(1, 38080, PathBuf::from("/a.html")))
            .unwrap();
        registry
            .save(&session(2, 38081, PathBuf::from("/b.html")))
            .unwrap();

        registry.remove(38080).unwrap();

        assert_eq!(registry.get(38080), None);
        assert!(registry.get(38081).is_some());
    }

    #[test]
    fn test_remove_absent_entry_is_noop() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        registry.remove(38080).unwrap();

        assert!(!registry.path().exists());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        registry
            .save(&session(1, 38080, PathBuf::from("/a.html")))
            .unwrap();

        let names: Vec<String> = fs::read_dir(registry.path().parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();

        assert!(names.iter().all(|name| !name.ends_with(".tmp")), "{names:?}");
    }

    #[test]
    fn test_clean_dead_removes_dead_entries_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let html = dir.path().join("dead.html");
        fs::write(&html, "<html></html>").unwrap();
        registry.save(&session(dead_pid(), 38080, html.clone())).unwrap();

        let cleaned = registry.clean_dead().unwrap();

        assert!(cleaned >= 1);
        assert_eq!(registry.get(38080), None);
        assert!(!html.exists());
    }

    #[test]
    fn test_clean_dead_keeps_own_process() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let html = dir.path().join("live.html");
        fs::write(&html, "<html></html>").unwrap();
        registry
            .save(&session(std::process::id(), 38080, html.clone()))
            .unwrap();
        registry
            .save(&session(dead_pid(), 38081, PathBuf::from("/missing.html")))
            .unwrap();

        let cleaned = registry.clean_dead().unwrap();

        assert_eq!(cleaned, 1);
        assert!(registry.get(38080).is_some());
        assert!(html.exists());
    }

    #[test]
    fn test_clean_dead_on_empty_registry() {
        let dir = TempDir::new().unwrap();
        assert_eq!(registry(&dir).clean_dead().unwrap(), 0);
    }

    #[test]
    fn test_cleanup_on_port_without_entry() {
        let dir = TempDir::new().unwrap();

        let result = registry(&dir).cleanup_on_port(38080).unwrap();

        assert_eq!(result, CleanupResult::default());
        assert!(!result.killed);
        assert!(!result.html_removed);
    }

    #[test]
    fn test_cleanup_on_port_with_dead_process() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let html = dir.path().join("a.html");
        fs::write(&html, "<html></html>").unwrap();
        let pid = dead_pid();
        registry.save(&session(pid, 38080, html.clone())).unwrap();

        let result = registry.cleanup_on_port(38080).unwrap();

        assert_eq!(
            result,
            CleanupResult {
                killed: false,
                html_removed: true,
                pid: Some(pid),
                previous_source: Some(PathBuf::from("/docs/README.md")),
                skip_reason: Some(SkipReason::AlreadyDead),
            }
        );
        assert!(!html.exists());
        assert_eq!(registry.get(38080), None);
    }

    #[test]
    fn test_cleanup_on_port_kills_verified_process() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).with_guard(ProcessGuard::new(["sleep"]));
        let mut child = spawn_sleeper();
        let pid = child.id();
        registry
            .save(&session(pid, 38080, dir.path().join("missing.html")))
            .unwrap();

        let result = registry.cleanup_on_port(38080).unwrap();

        assert!(result.killed);
        assert!(!result.html_removed);
        assert_eq!(result.skip_reason, None);
        assert!(!is_process_alive(pid));
        assert_eq!(registry.get(38080), None);
        child.wait().unwrap();
    }

    #[test]
    fn test_cleanup_on_port_spares_reused_pid() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).with_guard(ProcessGuard::new(["vimd"]));
        let mut child = spawn_sleeper();
        let pid = child.id();
        let html = dir.path().join("a.html");
        fs::write(&html, "<html></html>").unwrap();
        registry.save(&session(pid, 38080, html.clone())).unwrap();

        let result = registry.cleanup_on_port(38080).unwrap();

        assert!(!result.killed);
        assert_eq!(result.skip_reason, Some(SkipReason::IdentityMismatch));
        assert!(is_process_alive(pid));
        assert!(result.html_removed);
        assert_eq!(registry.get(38080), None);

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_cleanup_on_port_never_kills_current_process() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        registry
            .save(&session(std::process::id(), 38080, PathBuf::from("/a.html")))
            .unwrap();

        let result = registry.cleanup_on_port(38080).unwrap();

        assert!(!result.killed);
        assert_eq!(result.skip_reason, Some(SkipReason::CurrentProcess));
        assert_eq!(registry.get(38080), None);
    }

    #[test]
    fn test_concurrent_saves_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let path = Arc::new(dir.path().join("vimd").join("sessions.json"));

        let handles: Vec<_> = (0..8u16)
            .map(|i| {
                let path = Arc::clone(&path);
                thread::spawn(move || {
                    let registry = SessionRegistry::new(path.as_ref().clone());
                    let port = 40000 + i;
                    registry
                        .save(&session(1, port, PathBuf::from(format!("/{port}.html"))))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let registry = SessionRegistry::new(path.as_ref().clone());
        assert_eq!(registry.load_all().len(), 8);
    }

    #[test]
    fn test_skip_reason_messages() {
        assert_eq!(SkipReason::AlreadyDead.to_string(), "Process already dead");
        assert_eq!(
            SkipReason::IdentityMismatch.to_string(),
            "PID reused by another process"
        );
    }

    #[test]
    fn test_for_current_process_uses_own_pid() {
        let session = Session::for_current_process(
            38080,
            PathBuf::from("/tmp/a.html"),
            PathBuf::from("/a.md"),
        );
        assert_eq!(session.pid, std::process::id());
        assert_eq!(session.port, 38080);
    }
}
