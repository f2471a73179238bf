//! Worker control socket.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth;
use crate::hub::protocol::WorkerMessage;
use crate::hub::Hub;
use crate::state::AppState;

/// Query parameters for the worker upgrade request. Both fields are checked
/// by the handler so a missing token still yields the 401 JSON body.
#[derive(Deserialize)]
pub struct WorkerWsQuery {
    #[serde(default)]
    pub token: String,
    #[serde(rename = "workerId", default)]
    pub worker_id: String,
}

/// `GET /api/worker/ws?token=<jwt>&workerId=<uuid>` — worker registration
/// socket. The token's subject is the owning user.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WorkerWsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match auth::verify_token(&state.config.auth.jwt_secret, &query.token) {
        Ok(id) => id,
        Err(e) => {
            warn!("worker ws auth failed: {e}");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid token"})),
            )
                .into_response();
        }
    };

    let Ok(worker_id) = Uuid::parse_str(&query.worker_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid worker id"})),
        )
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_worker_ws(socket, state, worker_id, user_id))
}

/// Read loop for one worker connection. Registration happens on entry and
/// unregistration on any exit path — socket closure is the only cancellation
/// signal.
async fn handle_worker_ws(socket: WebSocket, state: AppState, worker_id: Uuid, user_id: Uuid) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = Hub::outbound_channel();

    // Writer task: the single consumer of this worker's outbound channel.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    error!("worker ws: failed to serialize message: {e}");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    info!(worker_id = %worker_id, user_id = %user_id, "worker connected");
    state.hub.register_worker(worker_id, user_id, tx).await;

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<WorkerMessage>(&text) {
                Ok(parsed) => {
                    state.hub.handle_worker_message(worker_id, parsed).await;
                }
                Err(e) => {
                    warn!(worker_id = %worker_id, "invalid message from worker: {e}");
                }
            },
            Message::Close(_) => break,
            // The worker leg is text-only; binary and ping/pong frames are
            // ignored here (protocol-level pong is a JSON message).
            _ => {}
        }
    }

    info!(worker_id = %worker_id, "worker disconnected");
    state.hub.unregister_worker(worker_id).await;
    send_task.abort();
}
