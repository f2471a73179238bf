//! Viewer terminal socket — bridges a client websocket to hub calls.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::hub::protocol::ViewerMessage;
use crate::hub::Hub;
use crate::sessions::SessionType;
use crate::state::AppState;

/// Query parameters for the viewer upgrade request.
#[derive(Deserialize)]
pub struct ViewerWsQuery {
    #[serde(default)]
    pub token: String,
}

/// `GET /api/sessions/{id}/terminal?token=<jwt>` — attach to a session's
/// output stream. The session must exist and belong to the token's subject;
/// attaching to an offline session is allowed (scrollback review).
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<ViewerWsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match auth::verify_token(&state.config.auth.jwt_secret, &query.token) {
        Ok(id) => id,
        Err(e) => {
            warn!("viewer ws auth failed: {e}");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid token"})),
            )
                .into_response();
        }
    };

    let session = match state.session_repo.find_by_id(session_id).await {
        Ok(Some(sess)) if sess.user_id == user_id => sess,
        Ok(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "session not found"})),
            )
                .into_response();
        }
        Err(e) => {
            warn!(session_id = %session_id, "session lookup failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "session lookup failed"})),
            )
                .into_response();
        }
    };

    // Container sessions are proxied by a different deployment; this server
    // only relays worker-hosted PTYs.
    if session.session_type != SessionType::Worker {
        return (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({"error": "container sessions are not served here"})),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_viewer_ws(socket, state, session_id))
}

/// Read loop for one viewer connection.
///
/// Downstream: binary frames only (scrollback blob, then live output),
/// delivered through the hub's fan-out into this socket's writer task.
/// Upstream: JSON `resize` on text frames, raw keystrokes on binary frames
/// (base64-encoded before handing to the hub). Unparseable or unexpected
/// text frames are dropped for forward compatibility.
async fn handle_viewer_ws(socket: WebSocket, state: AppState, session_id: Uuid) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = Hub::outbound_channel();

    let send_task = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sink.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });

    let viewer_id = state.hub.register_viewer(session_id, tx).await;

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                if let Ok(ViewerMessage::Resize { cols, rows }) = serde_json::from_str(&text) {
                    state.hub.send_resize(session_id, cols, rows).await;
                }
            }
            Message::Binary(data) => {
                let encoded = BASE64.encode(&data);
                state.hub.send_input(session_id, encoded).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!(session_id = %session_id, viewer_id = %viewer_id, "viewer disconnected");
    state.hub.unregister_viewer(session_id, viewer_id).await;
    send_task.abort();
}
