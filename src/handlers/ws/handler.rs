//! Relay WebSocket handler
//!
//! Accepts a client upgrade, dials a fresh backend stream and hands both legs
//! to a [`RelaySession`]. The handler returns as soon as the upgrade response
//! is built; each session then runs on its own task.

use axum::{
    Extension,
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade, close_code, rejection::WebSocketUpgradeRejection},
    },
    http::HeaderValue,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::relay::{ClientCloser, RelaySession};
use crate::errors::AppError;
use crate::middleware::ConnectionSlot;
use crate::state::AppState;

/// Header carrying the session id on the upgrade response
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Maximum WebSocket frame size (1 MB); protocol frames are 4 KB
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Relay WebSocket handler
///
/// Upgrades the HTTP connection and starts one relay session for it. The
/// session id is returned in the `x-session-id` response header so the
/// client can address the session over the HTTP API.
///
/// Handshake failures are logged and answered with the rejection; no
/// session is created for them.
pub async fn ws_relay_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<AppState>>,
    slot: Option<Extension<ConnectionSlot>>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(error = %rejection, "WebSocket handshake rejected");
            return rejection.into_response();
        }
    };

    if state.is_shutting_down() {
        return AppError::ShuttingDown.into_response();
    }

    let session_id = Uuid::new_v4().to_string();
    let slot = slot.map(|Extension(slot)| slot);
    debug!(session_id = %session_id, "WebSocket upgrade requested");

    let upgrade_id = session_id.clone();
    let failed_id = session_id.clone();
    let mut response = ws
        .max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_failed_upgrade(move |e| {
            warn!(session_id = %failed_id, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_relay_socket(socket, state, upgrade_id, slot));

    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

/// Run one relay session over an upgraded socket
async fn handle_relay_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: String,
    slot: Option<ConnectionSlot>,
) {
    let backend = state.backend();
    let settings = state.config.relay_settings();
    let shutdown = state.shutdown_token();

    info!(
        session_id = %session_id,
        ip = ?slot.as_ref().map(|s| s.0.ip()),
        backend = %backend.describe(),
        "WebSocket connection established"
    );

    let opened = tokio::select! {
        _ = shutdown.cancelled() => None,
        opened = backend.open_stream() => Some(opened),
    };

    let stream = match opened {
        Some(Ok(stream)) => stream,
        Some(Err(e)) => {
            warn!(session_id = %session_id, error = %e, "Backend unavailable, aborting session");
            let (sink, _) = socket.split();
            ClientCloser::new(sink)
                .close(
                    Some((close_code::AGAIN, "backend unavailable".to_string())),
                    settings.close_timeout,
                )
                .await;
            return;
        }
        None => {
            let (sink, _) = socket.split();
            ClientCloser::new(sink)
                .close(
                    Some((close_code::AWAY, "server shutting down".to_string())),
                    settings.close_timeout,
                )
                .await;
            return;
        }
    };

    let session = RelaySession::new(session_id.clone(), stream, settings);
    let handle = session.handle();
    state.register_session(handle.clone());

    // Shutdown may have started between the check above and registration
    if state.is_shutting_down() {
        handle.shutdown();
    }

    let (sink, stream) = socket.split();
    let report = session.run(stream, sink).await;

    state.unregister_session(&session_id);
    drop(slot);

    debug!(
        session_id = %session_id,
        reason = %report.end,
        events_dropped = report.events_dropped,
        "Relay session released"
    );
}
