use cruncher_core::status::JobStatus;
use cruncher_core::types::{JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Job {
    #[sqlx(try_from = "String")]
    pub job_id: JobId,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub created_at: Timestamp,
    /// Bumped on every status change; stale `RUNNING` rows are orphans.
    pub updated_at: Timestamp,
    pub payload: serde_json::Value,
    /// Set only on `SUCCEEDED`.
    pub result: Option<serde_json::Value>,
    /// Set only on `FAILED` or `CANCELLED`.
    pub error: Option<String>,
}
