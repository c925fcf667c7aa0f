//! Session bookkeeping for vimd preview servers.
//!
//! Several preview servers can run on one machine at once, each in its own
//! process. This crate holds the pieces they use to coordinate:
//!
//! - [`find_available_port`] picks a free TCP port near the requested one
//! - [`ProcessGuard`] checks and terminates processes, verifying a PID still
//!   belongs to vimd before signalling it
//! - [`SessionRegistry`] is the shared, file-backed table of running sessions
//! - [`SessionDir`] owns a session's temporary output directory
//!
//! # Example
//!
//! ```ignore
//! use vimd_session::{Session, SessionRegistry};
//!
//! let registry = SessionRegistry::open_default();
//! registry.clean_dead()?;
//! let previous = registry.cleanup_on_port(38080)?;
//! if previous.killed {
//!     println!("stopped previous session");
//! }
//! ```

mod lock;
pub mod port;
pub mod process;
pub mod registry;
pub mod workspace;

pub use port::{
    MAX_PORT_ATTEMPTS, PortError, candidate_ports, find_available_port, find_available_port_on,
    is_port_available, is_port_available_on,
};
pub use process::{ProcessError, ProcessGuard, is_process_alive};
pub use registry::{CleanupResult, RegistryError, Session, SessionRegistry, Sessions, SkipReason};
pub use workspace::SessionDir;
