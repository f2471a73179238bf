//! SQLite pool setup and startup migrations.
//!
//! Two tables back the relay core: `workers` and `sessions`. Ids are stored
//! as hyphenated uuid text, timestamps as RFC 3339 text via chrono.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Connect to `database_url` and run migrations.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Idempotent schema creation.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workers (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'offline',
            active_sessions INTEGER NOT NULL DEFAULT 0,
            capacity INTEGER NOT NULL DEFAULT 10,
            last_seen_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            session_type TEXT NOT NULL DEFAULT 'worker',
            worker_id TEXT,
            work_dir TEXT NOT NULL DEFAULT '',
            command TEXT NOT NULL DEFAULT '',
            exit_code INTEGER,
            status TEXT NOT NULL DEFAULT 'creating',
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_workers_user ON workers(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_worker ON sessions(worker_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    migrate(&pool).await.expect("migrations");
    pool
}
