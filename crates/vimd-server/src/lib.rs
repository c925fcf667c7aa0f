//! Live-reload preview server for vimd.
//!
//! This crate serves a directory of generated HTML over HTTP and pushes reload
//! notifications to open browser tabs over WebSocket:
//! - [`ReloadGateway`] owns the listener, static file serving and the client set
//! - HTML responses get [`RELOAD_SCRIPT`] injected on the fly
//! - [`ChangeDebouncer`] turns bursts of filesystem events into single callbacks
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use vimd_server::{ChangeDebouncer, GatewayOptions, ReloadGateway};
//!
//! let mut gateway = ReloadGateway::new();
//! let started = gateway
//!     .start(GatewayOptions::new("/tmp/vimd/session", 38080, "localhost"))
//!     .await?;
//!
//! let broadcaster = gateway.broadcaster();
//! let watcher = ChangeDebouncer::watch("README.md".as_ref(), Duration::from_millis(100), &[])?;
//! watcher.on_change(move |_| {
//!     broadcaster.broadcast("reload", None);
//! });
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► axum router (ReloadGateway)
//!    ▲                   │
//!    │                   ├─► /__vimd/ws ──► ClientSet (one writer task per socket)
//!    │                   │
//!    │                   └─► ServeDir ──► reload script injection (*.html)
//!    │
//!    └──── {"type":"reload"} ◄── Broadcaster ◄── ChangeDebouncer ◄── notify
//! ```

mod app;
mod error;
mod gateway;
mod inject;
mod live_reload;
mod middleware;
mod state;

pub use error::{GatewayError, WatchError};
pub use gateway::{
    GatewayOptions, GatewayState, ReloadGateway, START_TIMEOUT, STOP_TIMEOUT, StartResult, WS_PATH,
};
pub use inject::{RELOAD_SCRIPT, inject_reload_script};
pub use live_reload::{Broadcaster, ChangeDebouncer};
