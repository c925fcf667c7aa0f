//! Live reload: WebSocket clients and debounced file watching.

mod clients;
mod debouncer;
mod watcher;
mod websocket;

pub use clients::Broadcaster;
pub(crate) use clients::ClientSet;
pub use watcher::ChangeDebouncer;
pub(crate) use websocket::ws_handler;
