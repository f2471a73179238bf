//! Worker-session lifecycle: creation, resume, teardown.
//!
//! The manager owns the persisted side of a session's life and drives the
//! hub for the live side. Spawn commands for *new* sessions come from the
//! request (`claude` or `claude --resume <id>`); auto-resume after a worker
//! reconnect uses the hub's fixed continuation command instead.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::repository::SessionRepository;
use super::{Session, SessionStatus, SessionType};
use crate::hub::{Hub, RESUME_COMMAND};
use crate::workers::selector::{SelectorError, WorkerSelector};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no available worker: {0}")]
    NoWorker(#[from] SelectorError),
    #[error("session has no worker")]
    Unbound,
    #[error("container sessions are not supported by this server")]
    ContainerUnsupported,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct SessionManager {
    repo: SessionRepository,
    selector: WorkerSelector,
    hub: Arc<Hub>,
}

impl SessionManager {
    pub fn new(repo: SessionRepository, selector: WorkerSelector, hub: Arc<Hub>) -> Self {
        Self {
            repo,
            selector,
            hub,
        }
    }

    /// Create a worker-type session: pick a worker, persist the row as
    /// `creating`, then issue the spawn. The worker's `session-started`
    /// reply is what moves the row to `running`.
    pub async fn create_worker_session(
        &self,
        user_id: Uuid,
        name: &str,
        claude_session_id: Option<&str>,
        work_dir: Option<&str>,
    ) -> Result<Session, ManagerError> {
        let worker_id = self.selector.select(user_id).await?;

        let command = match claude_session_id {
            Some(id) if !id.is_empty() => format!("claude --resume {id}"),
            _ => "claude".to_string(),
        };
        let work_dir = match work_dir {
            Some(dir) if !dir.is_empty() => dir.to_string(),
            _ => "~".to_string(),
        };

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            session_type: SessionType::Worker,
            worker_id: Some(worker_id),
            work_dir,
            command,
            exit_code: None,
            status: SessionStatus::Creating,
            created_at: now,
            updated_at: now,
        };
        self.repo.create(&session).await?;

        self.hub
            .spawn_session(session.id, worker_id, &session.command, &session.work_dir)
            .await;
        info!(session_id = %session.id, worker_id = %worker_id, "session created");
        Ok(session)
    }

    /// Re-issue a spawn for an offline session on its last worker, with the
    /// fixed continuation command.
    pub async fn resume_session(&self, session: &Session) -> Result<(), ManagerError> {
        let worker_id = session.worker_id.ok_or(ManagerError::Unbound)?;
        let work_dir = if session.work_dir.is_empty() {
            "~"
        } else {
            &session.work_dir
        };
        self.hub
            .spawn_session(session.id, worker_id, RESUME_COMMAND, work_dir)
            .await;
        Ok(())
    }

    /// Kill a worker session's PTY, drop its relay, and remove the row.
    pub async fn destroy_worker_session(&self, session: &Session) -> Result<(), ManagerError> {
        if session.session_type != SessionType::Worker {
            return Err(ManagerError::ContainerUnsupported);
        }
        self.hub.kill_session(session.id).await;
        self.repo.delete(session.id).await?;
        self.hub.evict(session.id).await;
        info!(session_id = %session.id, "session destroyed");
        Ok(())
    }
}
