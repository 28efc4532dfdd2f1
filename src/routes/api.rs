use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the HTTP API router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/sessions/{session_id}/reset", post(api::reset_session))
}
