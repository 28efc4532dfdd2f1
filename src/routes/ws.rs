use axum::{Router, middleware, routing::get};
use std::sync::Arc;

use crate::handlers::ws::ws_relay_handler;
use crate::middleware::{connection_limit_middleware, origin_middleware};
use crate::state::AppState;

/// Create the relay WebSocket router at the configured path
///
/// Layer order (outer to inner): origin -> connection_limit -> handler, so
/// rejected origins never consume a connection slot.
pub fn create_ws_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let path = state.config.ws_path.clone();
    Router::new()
        .route(&path, get(ws_relay_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            connection_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(state, origin_middleware))
}
