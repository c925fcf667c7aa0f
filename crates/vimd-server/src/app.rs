//! Router construction.
//!
//! Builds the axum router with all routes and middleware.

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Redirect};
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::gateway::WS_PATH;
use crate::inject;
use crate::live_reload;
use crate::middleware::headers;
use crate::state::AppState;

/// Create the application router.
///
/// # Arguments
///
/// * `state` - Shared application state
/// * `root_dir` - Directory served as static files
pub(crate) fn create_router(state: Arc<AppState>, root_dir: &Path) -> Router {
    let mut router = Router::new().route(WS_PATH, get(live_reload::ws_handler));

    if state.entry_file.is_some() {
        router = router.route("/", get(redirect_to_entry));
    }

    router
        .fallback_service(ServeDir::new(root_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(headers::cache_control_layer())
                .layer(headers::content_type_options_layer())
                .layer(axum::middleware::from_fn(inject::inject_reload_middleware)),
        )
        .with_state(state)
}

/// Redirect the root URL to the previewed page.
async fn redirect_to_entry(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entry = state.entry_file.as_deref().unwrap_or_default();
    Redirect::temporary(&format!("/{}", encode_path(entry)))
}

/// Percent-encode a relative URL path, keeping `/` separators.
fn encode_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for byte in path.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~/".contains(&byte) {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}
