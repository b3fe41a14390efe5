use cruncher_core::status::JobStatus;
use cruncher_core::types::JobId;

/// Failures surfaced by the job store.
///
/// `Database` and `Migrate` are not locally recoverable and must reach the
/// caller of whatever operation hit them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} already exists")]
    DuplicateId(JobId),

    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {id}: status {to} cannot carry a {field}")]
    InvalidOutcome {
        id: JobId,
        to: JobStatus,
        field: &'static str,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
