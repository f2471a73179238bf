//! Persistence for worker rows.
//!
//! The hub treats every failure here as non-fatal: live relay state is
//! authoritative while the backend is unavailable.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use super::{Worker, WorkerStatus};

/// Raw row as stored; converted to [`Worker`] after fetch.
#[derive(FromRow)]
struct WorkerRow {
    id: String,
    user_id: String,
    name: String,
    status: String,
    active_sessions: i64,
    capacity: i64,
    last_seen_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkerRow> for Worker {
    type Error = sqlx::Error;

    fn try_from(row: WorkerRow) -> Result<Self, Self::Error> {
        let decode = |what: &str, err: String| sqlx::Error::ColumnDecode {
            index: what.to_string(),
            source: err.into(),
        };
        Ok(Worker {
            id: Uuid::parse_str(&row.id).map_err(|e| decode("id", e.to_string()))?,
            user_id: Uuid::parse_str(&row.user_id)
                .map_err(|e| decode("user_id", e.to_string()))?,
            status: WorkerStatus::parse(&row.status)
                .ok_or_else(|| decode("status", format!("unknown status {:?}", row.status)))?,
            name: row.name,
            active_sessions: row.active_sessions,
            capacity: row.capacity,
            last_seen_at: row.last_seen_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct WorkerRepository {
    pool: SqlitePool,
}

impl WorkerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Worker>, sqlx::Error> {
        let row: Option<WorkerRow> = sqlx::query_as("SELECT * FROM workers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Worker::try_from).transpose()
    }

    pub async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Worker>, sqlx::Error> {
        let rows: Vec<WorkerRow> =
            sqlx::query_as("SELECT * FROM workers WHERE user_id = ? ORDER BY created_at DESC")
                .bind(user_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Worker::try_from).collect()
    }

    /// The least-loaded online worker for `user_id` with spare capacity, if
    /// any. Ties are broken by row order.
    pub async fn select_available(&self, user_id: Uuid) -> Result<Option<Worker>, sqlx::Error> {
        let row: Option<WorkerRow> = sqlx::query_as(
            r#"
            SELECT * FROM workers
            WHERE user_id = ? AND status = 'online' AND active_sessions < capacity
            ORDER BY active_sessions ASC
            LIMIT 1
            "#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Worker::try_from).transpose()
    }

    pub async fn update(&self, worker: &Worker) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE workers SET
                user_id = ?, name = ?, status = ?, active_sessions = ?,
                capacity = ?, last_seen_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(worker.user_id.to_string())
        .bind(&worker.name)
        .bind(worker.status.as_str())
        .bind(worker.active_sessions)
        .bind(worker.capacity)
        .bind(worker.last_seen_at)
        .bind(Utc::now())
        .bind(worker.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert the row, or update it in place if the id already exists.
    pub async fn upsert(&self, worker: &Worker) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO workers (
                id, user_id, name, status, active_sessions, capacity,
                last_seen_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                status = excluded.status,
                last_seen_at = excluded.last_seen_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(worker.id.to_string())
        .bind(worker.user_id.to_string())
        .bind(&worker.name)
        .bind(worker.status.as_str())
        .bind(worker.active_sessions)
        .bind(worker.capacity)
        .bind(worker.last_seen_at)
        .bind(worker.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workers WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of worker rows, used by tests and diagnostics.
    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM workers")
            .fetch_one(&self.pool)
            .await?;
        row.try_get("n")
    }
}
