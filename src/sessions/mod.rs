//! Terminal sessions — persisted lifecycle records for PTYs hosted on
//! workers.

pub mod manager;
pub mod repository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a session.
///
/// `offline` is non-terminal: it marks a running session whose worker
/// disconnected, and survives server restarts so the worker's next
/// registration can auto-resume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Creating,
    Running,
    Stopped,
    Error,
    Offline,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(Self::Creating),
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "error" => Some(Self::Error),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Where a session's PTY runs. Container-mode provisioning is handled by a
/// separate path; this server only drives worker-type sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Worker,
    Container,
}

impl SessionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Container => "container",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "worker" => Some(Self::Worker),
            "container" => Some(Self::Container),
            _ => None,
        }
    }
}

/// A persisted session row.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub session_type: SessionType,
    /// The worker this session is (or was last) bound to.
    pub worker_id: Option<Uuid>,
    pub work_dir: String,
    pub command: String,
    pub exit_code: Option<i32>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
