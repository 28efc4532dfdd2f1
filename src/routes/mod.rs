//! Router assembly
//!
//! ```text
//! GET  {ws_path}                     relay WebSocket upgrade
//! GET  /health                       health check
//! POST /sessions/{session_id}/reset  reset a live session's VAD state
//! *                                  static assets from `static_dir`
//! ```

pub mod api;
pub mod ws;

use axum::Router;
use http::{HeaderValue, header};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete application router
pub fn create_app(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir).append_index_html_on_directories(true);

    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    Router::new()
        .merge(ws::create_ws_router(state.clone()))
        .merge(api::create_api_router())
        .fallback_service(static_files)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(security_headers)
}
