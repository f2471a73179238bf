//! Liveness probe.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /api/health` — unauthenticated liveness check.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}
