//! Shared application state.

use std::sync::Arc;

use crate::live_reload::ClientSet;

/// State shared by all request handlers.
pub(crate) struct AppState {
    /// Open live-reload connections.
    pub clients: Arc<ClientSet>,
    /// File `GET /` redirects to, relative to the served root.
    pub entry_file: Option<String>,
}
