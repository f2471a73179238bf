//! Worker selection for new sessions.

use thiserror::Error;
use uuid::Uuid;

use super::repository::WorkerRepository;

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("no online worker available")]
    NoWorkerAvailable,
    #[error("worker lookup failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Picks the worker a new session should land on: the least-loaded online
/// worker owned by the user that still has spare capacity. No affinity.
#[derive(Clone)]
pub struct WorkerSelector {
    repo: WorkerRepository,
}

impl WorkerSelector {
    pub fn new(repo: WorkerRepository) -> Self {
        Self { repo }
    }

    pub async fn select(&self, user_id: Uuid) -> Result<Uuid, SelectorError> {
        self.repo
            .select_available(user_id)
            .await?
            .map(|w| w.id)
            .ok_or(SelectorError::NoWorkerAvailable)
    }
}
