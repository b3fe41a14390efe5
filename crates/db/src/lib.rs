//! Durable job store backed by SQLite.
//!
//! The pool is the only handle callers need; every query goes through
//! [`repositories::JobRepo`]. SQLx runs each SQLite connection on its own
//! worker thread, so store latency never blocks the async scheduler.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

pub mod error;
pub mod models;
pub mod repositories;

pub use error::StoreError;

pub type DbPool = sqlx::SqlitePool;

/// Connections kept open against the job database.
const MAX_CONNECTIONS: u32 = 8;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn tune(options: SqliteConnectOptions) -> SqliteConnectOptions {
    options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
}

/// Open (creating if needed) the job database file at `path` and apply migrations.
pub async fn open(path: impl AsRef<Path>) -> Result<DbPool, StoreError> {
    let path = path.as_ref();
    let options = tune(SqliteConnectOptions::new().filename(path));
    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    tracing::info!(path = %path.display(), "Job database opened");
    Ok(pool)
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply embedded migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
