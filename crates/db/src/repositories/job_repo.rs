//! Repository for the `jobs` table.
//!
//! Every status change is a single conditional `UPDATE ... WHERE status IN
//! (<legal predecessors>)`, so concurrent writers to the same row cannot
//! interleave into an illegal state: whichever loses the race sees zero
//! affected rows and gets `InvalidTransition`.

use chrono::Utc;
use cruncher_core::status::JobStatus;
use cruncher_core::types::{JobId, Timestamp};

use crate::error::StoreError;
use crate::models::job::Job;
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "job_id, status, created_at, updated_at, payload, result, error";

/// Provides the job store contract: insert, guarded status updates, lookup.
pub struct JobRepo;

impl JobRepo {
    /// Create a new `PENDING` job.
    ///
    /// Fails with `DuplicateId` if `id` is already present.
    pub async fn insert(
        pool: &DbPool,
        id: &JobId,
        payload: &serde_json::Value,
    ) -> Result<Job, StoreError> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO jobs (job_id, status, created_at, updated_at, payload, result, error) \
             VALUES (?, ?, ?, ?, ?, NULL, NULL) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id.as_str())
            .bind(JobStatus::Pending.as_str())
            .bind(now)
            .bind(now)
            .bind(payload)
            .fetch_one(pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    StoreError::DuplicateId(id.clone())
                }
                other => StoreError::Database(other),
            })
    }

    /// Atomically move a job to `status`, attaching `result` or `error`.
    ///
    /// `result` is only accepted with `SUCCEEDED`; `error` only with `FAILED`
    /// or `CANCELLED`. Returns the updated row.
    pub async fn update_status(
        pool: &DbPool,
        id: &JobId,
        status: JobStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<Job, StoreError> {
        if result.is_some() && !status.carries_result() {
            return Err(StoreError::InvalidOutcome {
                id: id.clone(),
                to: status,
                field: "result",
            });
        }
        if error.is_some() && !status.carries_error() {
            return Err(StoreError::InvalidOutcome {
                id: id.clone(),
                to: status,
                field: "error",
            });
        }

        let allowed_from = status.predecessors();
        if !allowed_from.is_empty() {
            let placeholders = vec!["?"; allowed_from.len()].join(", ");
            let query = format!(
                "UPDATE jobs \
                 SET status = ?, updated_at = ?, result = ?, error = ? \
                 WHERE job_id = ? AND status IN ({placeholders}) \
                 RETURNING {COLUMNS}"
            );

            let mut q = sqlx::query_as::<_, Job>(&query)
                .bind(status.as_str())
                .bind(Utc::now())
                .bind(result)
                .bind(error)
                .bind(id.as_str());
            for from in allowed_from {
                q = q.bind(from.as_str());
            }

            if let Some(job) = q.fetch_optional(pool).await? {
                tracing::debug!(job_id = %id, status = %status, "Job status updated");
                return Ok(job);
            }
        }

        // Nothing matched: either the row is missing or it is in a state
        // that does not lead to `status`.
        match Self::find_by_id(pool, id).await? {
            None => Err(StoreError::NotFound(id.clone())),
            Some(current) => Err(StoreError::InvalidTransition {
                id: id.clone(),
                from: current.status,
                to: status,
            }),
        }
    }

    /// `PENDING -> RUNNING`.
    pub async fn mark_running(pool: &DbPool, id: &JobId) -> Result<Job, StoreError> {
        Self::update_status(pool, id, JobStatus::Running, None, None).await
    }

    /// `RUNNING -> SUCCEEDED` with the computation's result.
    pub async fn complete(
        pool: &DbPool,
        id: &JobId,
        result: &serde_json::Value,
    ) -> Result<Job, StoreError> {
        Self::update_status(pool, id, JobStatus::Succeeded, Some(result), None).await
    }

    /// `RUNNING -> FAILED` with a human-readable message.
    pub async fn fail(pool: &DbPool, id: &JobId, error: &str) -> Result<Job, StoreError> {
        Self::update_status(pool, id, JobStatus::Failed, None, Some(error)).await
    }

    /// `RUNNING -> CANCELLED` with the reason.
    pub async fn cancel(pool: &DbPool, id: &JobId, reason: &str) -> Result<Job, StoreError> {
        Self::update_status(pool, id, JobStatus::Cancelled, None, Some(reason)).await
    }

    /// `PENDING -> RUNNING -> CANCELLED` in one transaction.
    ///
    /// For jobs cancelled before they were admitted. Readers only ever see
    /// `PENDING` or `CANCELLED`, never a `RUNNING` row that holds no slot.
    pub async fn cancel_before_start(
        pool: &DbPool,
        id: &JobId,
        reason: &str,
    ) -> Result<Job, StoreError> {
        let mut tx = pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE jobs SET status = ?, updated_at = ? WHERE job_id = ? AND status = ?",
        )
        .bind(JobStatus::Running.as_str())
        .bind(Utc::now())
        .bind(id.as_str())
        .bind(JobStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return match Self::find_by_id(pool, id).await? {
                None => Err(StoreError::NotFound(id.clone())),
                Some(current) => Err(StoreError::InvalidTransition {
                    id: id.clone(),
                    from: current.status,
                    to: JobStatus::Running,
                }),
            };
        }

        let query = format!(
            "UPDATE jobs SET status = ?, updated_at = ?, error = ? \
             WHERE job_id = ? AND status = ? \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Cancelled.as_str())
            .bind(Utc::now())
            .bind(reason)
            .bind(id.as_str())
            .bind(JobStatus::Running.as_str())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(job_id = %id, "Job cancelled before admission");
        Ok(job)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &DbPool, id: &JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE job_id = ?");
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id.as_str())
            .fetch_optional(pool)
            .await?;
        Ok(job)
    }

    /// Like [`JobRepo::find_by_id`] but a missing row is `NotFound`.
    pub async fn get(pool: &DbPool, id: &JobId) -> Result<Job, StoreError> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// `RUNNING` jobs whose last status change is older than `older_than`.
    ///
    /// After an unclean shutdown these are the jobs whose dispatch died with
    /// the process. Oldest first.
    pub async fn list_stale_running(
        pool: &DbPool,
        older_than: Timestamp,
    ) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = ? AND julianday(updated_at) < julianday(?) \
             ORDER BY julianday(updated_at) ASC"
        );
        let jobs = sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Running.as_str())
            .bind(older_than)
            .fetch_all(pool)
            .await?;
        Ok(jobs)
    }
}
