//! Worker CRUD. Workers self-register over their websocket; REST only
//! exposes listing and explicit deletion.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthedUser;
use crate::state::AppState;

/// `GET /api/workers` — the user's workers, with live connectivity from the
/// hub alongside the persisted status.
pub async fn list(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> Response {
    let workers = match state.worker_repo.find_by_user(user_id).await {
        Ok(workers) => workers,
        Err(e) => {
            warn!("failed to list workers: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to list workers"})),
            )
                .into_response();
        }
    };

    let mut result = Vec::with_capacity(workers.len());
    for w in &workers {
        result.push(json!({
            "id": w.id,
            "name": w.name,
            "status": w.status,
            "activeSessions": w.active_sessions,
            "capacity": w.capacity,
            "connected": state.hub.is_worker_connected(w.id).await,
            "lastSeenAt": w.last_seen_at,
        }));
    }
    Json(result).into_response()
}

/// `DELETE /api/workers/{id}` — disconnect and deregister a worker.
pub async fn delete(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(worker_id): Path<Uuid>,
) -> Response {
    match state.worker_repo.find_by_id(worker_id).await {
        Ok(Some(w)) if w.user_id == user_id => {}
        Ok(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "worker not found"})),
            )
                .into_response();
        }
        Err(e) => {
            warn!(worker_id = %worker_id, "worker lookup failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "worker lookup failed"})),
            )
                .into_response();
        }
    }

    // Drop the live connection (and offline its sessions) before the row
    // goes away.
    state.hub.unregister_worker(worker_id).await;

    match state.worker_repo.delete(worker_id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(worker_id = %worker_id, "failed to delete worker: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to delete worker"})),
            )
                .into_response()
        }
    }
}
