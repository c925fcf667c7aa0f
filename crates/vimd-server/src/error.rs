//! Error types for the preview server.

use std::path::PathBuf;
use std::time::Duration;

use vimd_session::PortError;

use crate::gateway::GatewayState;

/// Errors returned by [`ReloadGateway`](crate::ReloadGateway).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Invalid start options.
    #[error("Invalid server configuration: {0}")]
    Configuration(String),

    /// No port could be negotiated.
    #[error(transparent)]
    Port(#[from] PortError),

    /// Binding or serving failed.
    #[error("Failed to listen on {addr}: {source}")]
    Network {
        /// Address being bound.
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An operation did not complete in time.
    #[error("Server {operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// `"start"` or `"stop"`.
        operation: &'static str,
        after: Duration,
    },

    /// The operation is not valid in the current lifecycle state.
    #[error("Cannot {operation} server while {state}")]
    InvalidState {
        operation: &'static str,
        state: GatewayState,
    },
}

/// Errors returned when setting up a [`ChangeDebouncer`](crate::ChangeDebouncer) watch.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The file watcher could not be created or attached.
    #[error("Failed to watch {}: {source}", .path.display())]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// An ignore pattern is not a valid glob.
    #[error("Invalid ignore pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// The watched path has no file name.
    #[error("Not a file path: {}", .0.display())]
    NotAFile(PathBuf),
}
