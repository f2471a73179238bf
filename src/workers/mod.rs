//! Worker agents — remote processes that host PTYs and speak the worker
//! websocket protocol.

pub mod repository;
pub mod selector;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of concurrent sessions a worker may host.
pub const DEFAULT_CAPACITY: i64 = 10;

/// Connectivity status of a worker, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// A persisted worker row.
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub status: WorkerStatus,
    /// Sessions currently counted against this worker's capacity. Maintained
    /// by the session CRUD path, not by the hub.
    pub active_sessions: i64,
    pub capacity: i64,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Worker {
    /// A freshly connected worker that has no persisted row yet.
    pub fn new(id: Uuid, user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            name: "Worker".to_string(),
            status: WorkerStatus::Online,
            active_sessions: 0,
            capacity: DEFAULT_CAPACITY,
            last_seen_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}
