//! Persistence for session rows.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use uuid::Uuid;

use super::{Session, SessionStatus, SessionType};

#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    name: String,
    session_type: String,
    worker_id: Option<String>,
    work_dir: String,
    command: String,
    exit_code: Option<i32>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = sqlx::Error;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let decode = |what: &str, err: String| sqlx::Error::ColumnDecode {
            index: what.to_string(),
            source: err.into(),
        };
        Ok(Session {
            id: Uuid::parse_str(&row.id).map_err(|e| decode("id", e.to_string()))?,
            user_id: Uuid::parse_str(&row.user_id)
                .map_err(|e| decode("user_id", e.to_string()))?,
            worker_id: row
                .worker_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|e| decode("worker_id", e.to_string()))?,
            session_type: SessionType::parse(&row.session_type).ok_or_else(|| {
                decode("session_type", format!("unknown type {:?}", row.session_type))
            })?,
            status: SessionStatus::parse(&row.status)
                .ok_or_else(|| decode("status", format!("unknown status {:?}", row.status)))?,
            name: row.name,
            work_dir: row.work_dir,
            command: row.command,
            exit_code: row.exit_code,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, session: &Session) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, name, session_type, worker_id, work_dir,
                command, exit_code, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(&session.name)
        .bind(session.session_type.as_str())
        .bind(session.worker_id.map(|id| id.to_string()))
        .bind(&session.work_dir)
        .bind(&session.command)
        .bind(session.exit_code)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, sqlx::Error> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Session::try_from).transpose()
    }

    pub async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, sqlx::Error> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE user_id = ? ORDER BY created_at DESC")
                .bind(user_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    /// Offline sessions bound to `worker_id`, eligible for auto-resume when
    /// that worker reconnects.
    pub async fn find_resumable(&self, worker_id: Uuid) -> Result<Vec<Session>, sqlx::Error> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE worker_id = ? AND status = 'offline'")
                .bind(worker_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    pub async fn update(&self, session: &Session) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE sessions SET
                name = ?, session_type = ?, worker_id = ?, work_dir = ?,
                command = ?, exit_code = ?, status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&session.name)
        .bind(session.session_type.as_str())
        .bind(session.worker_id.map(|id| id.to_string()))
        .bind(&session.work_dir)
        .bind(&session.command)
        .bind(session.exit_code)
        .bind(session.status.as_str())
        .bind(Utc::now())
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
