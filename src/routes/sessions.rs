//! Session CRUD.
//!
//! All handlers require a bearer token; the authenticated user id arrives as
//! an [`AuthedUser`] extension. Creation persists the row and issues the
//! spawn; the `session-started` reply from the worker is what flips the row
//! to `running`. Deletion kills the live PTY and evicts the relay.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthedUser;
use crate::sessions::manager::ManagerError;
use crate::sessions::{Session, SessionType};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    name: String,
    /// `"worker"` (default) or `"container"`.
    #[serde(rename = "sessionType", default)]
    session_type: String,
    /// Optional: resume a specific Claude session.
    #[serde(rename = "claudeSessionId", default)]
    claude_session_id: String,
    /// Optional: working directory for the PTY.
    #[serde(rename = "workDir", default)]
    work_dir: String,
}

#[derive(Deserialize)]
pub struct RenameRequest {
    name: String,
}

fn session_json(sess: &Session) -> Value {
    json!({
        "id": sess.id,
        "name": sess.name,
        "status": sess.status,
        "sessionType": sess.session_type,
        "workDir": sess.work_dir,
        "createdAt": sess.created_at,
    })
}

/// `GET /api/sessions` — the user's sessions, newest first.
pub async fn list(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> Response {
    match state.session_repo.find_by_user(user_id).await {
        Ok(sessions) => {
            let result: Vec<Value> = sessions.iter().map(session_json).collect();
            Json(result).into_response()
        }
        Err(e) => {
            warn!("failed to list sessions: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to list sessions"})),
            )
                .into_response()
        }
    }
}

/// `POST /api/sessions` — create a worker session and issue its spawn.
pub async fn create(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(req): Json<CreateRequest>,
) -> Response {
    if !req.session_type.is_empty() && req.session_type != SessionType::Worker.as_str() {
        return (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({"error": "container sessions are not served here"})),
        )
            .into_response();
    }

    let name = if req.name.is_empty() {
        "New Session"
    } else {
        &req.name
    };
    let claude_session_id =
        (!req.claude_session_id.is_empty()).then_some(req.claude_session_id.as_str());
    let work_dir = (!req.work_dir.is_empty()).then_some(req.work_dir.as_str());

    match state
        .session_manager
        .create_worker_session(user_id, name, claude_session_id, work_dir)
        .await
    {
        Ok(sess) => (StatusCode::CREATED, Json(session_json(&sess))).into_response(),
        Err(ManagerError::NoWorker(e)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
        Err(e) => {
            warn!("failed to create session: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to create session"})),
            )
                .into_response()
        }
    }
}

/// `PATCH /api/sessions/{id}` — rename.
pub async fn rename(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<RenameRequest>,
) -> Response {
    if req.name.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "name is required"})),
        )
            .into_response();
    }

    let mut sess = match state.session_repo.find_by_id(session_id).await {
        Ok(Some(s)) if s.user_id == user_id => s,
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

    sess.name = req.name;
    match state.session_repo.update(&sess).await {
        Ok(()) => Json(json!({"id": sess.id, "name": sess.name})).into_response(),
        Err(e) => {
            warn!(session_id = %session_id, "failed to rename session: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to rename session"})),
            )
                .into_response()
        }
    }
}

/// `DELETE /api/sessions/{id}` — kill the PTY, drop the relay, remove the
/// row.
pub async fn delete(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(session_id): Path<Uuid>,
) -> Response {
    let sess = match state.session_repo.find_by_id(session_id).await {
        Ok(Some(s)) if s.user_id == user_id => s,
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

    match state.session_manager.destroy_worker_session(&sess).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(ManagerError::ContainerUnsupported) => (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({"error": "container sessions are not served here"})),
        )
            .into_response(),
        Err(e) => {
            warn!(session_id = %session_id, "failed to destroy session: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to destroy session"})),
            )
                .into_response()
        }
    }
}
