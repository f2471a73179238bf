//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::hub::Hub;
use crate::sessions::manager::SessionManager;
use crate::sessions::repository::SessionRepository;
use crate::workers::repository::WorkerRepository;

/// Passed to every handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// The in-memory session relay core.
    pub hub: Arc<Hub>,
    /// Worker-session lifecycle service.
    pub session_manager: Arc<SessionManager>,
    pub session_repo: SessionRepository,
    pub worker_repo: WorkerRepository,
    /// Monotonic instant when the server started (for uptime reporting).
    pub start_time: Instant,
}
