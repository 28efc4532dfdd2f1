use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub connections: usize,
    pub backend: String,
    /// Upgrade path of the relay WebSocket, for bundled clients
    pub ws_path: String,
}

/// Liveness and a snapshot of session counts
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.is_shutting_down() {
            "shutting_down"
        } else {
            "ok"
        },
        sessions: state.session_count(),
        connections: state.ws_connection_count(),
        backend: state.backend().describe(),
        ws_path: state.config.ws_path.clone(),
    })
}

#[derive(Debug, Serialize)]
pub struct ResetResponseBody {
    pub session_id: String,
    pub success: bool,
}

/// Reset the backend VAD state of a live session without interrupting it
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> AppResult<Json<ResetResponseBody>> {
    let handle = state
        .session(&session_id)
        .ok_or_else(|| AppError::SessionNotFound(session_id.clone()))?;

    let success = handle.reset().await?;
    info!(session_id = %session_id, success, "Session reset requested over HTTP");

    Ok(Json(ResetResponseBody {
        session_id,
        success,
    }))
}
