//! Per-job dispatch routine.
//!
//! One of these runs on the async scheduler for every submitted job:
//!
//! 1. wait for an admission slot (cancellable),
//! 2. mark the job `RUNNING`,
//! 3. hand the payload to the worker pool and wait for the outcome (cancellable),
//! 4. persist `SUCCEEDED`, `FAILED` or `CANCELLED`, then give the slot back,
//! 5. always drop the job's entry from the cancellation registry.
//!
//! Cancellation only ever interrupts the waiting side. A task a worker has
//! already started runs to completion and its result is discarded.

use std::sync::Arc;

use cruncher_core::types::JobId;
use cruncher_db::repositories::JobRepo;
use cruncher_worker::Task;
use tokio_util::sync::CancellationToken;

use crate::engine::EngineContext;
use crate::error::EngineError;

/// Message stored on jobs that end in `CANCELLED`.
pub const CANCELLED_MESSAGE: &str = "Cancelled by client/server";

/// How a dispatch ended. Cancellation is a value here, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Succeeded(serde_json::Value),
    Failed(String),
    Cancelled,
}

/// Drive one job to a terminal status, then unregister it.
///
/// `Err` means the store could not record the outcome; the row is left at
/// whatever status was last persisted.
pub(crate) async fn dispatch(
    ctx: Arc<EngineContext>,
    job_id: JobId,
    payload: serde_json::Value,
    cancel: CancellationToken,
) -> Result<DispatchOutcome, EngineError> {
    let outcome = drive(&ctx, &job_id, payload, &cancel).await;
    ctx.registry.unregister(&job_id).await;

    match &outcome {
        Ok(DispatchOutcome::Succeeded(_)) => {
            tracing::info!(job_id = %job_id, "Job succeeded");
        }
        Ok(DispatchOutcome::Failed(error)) => {
            tracing::warn!(job_id = %job_id, %error, "Job failed");
        }
        Ok(DispatchOutcome::Cancelled) => {
            tracing::info!(job_id = %job_id, "Job cancelled");
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Dispatch aborted");
        }
    }
    outcome
}

async fn drive(
    ctx: &EngineContext,
    job_id: &JobId,
    payload: serde_json::Value,
    cancel: &CancellationToken,
) -> Result<DispatchOutcome, EngineError> {
    tracing::debug!(
        job_id = %job_id,
        in_use = ctx.admission.in_use(),
        capacity = ctx.admission.capacity(),
        "Waiting for admission slot",
    );

    let permit = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            // No slot is held, so the RUNNING hop must not be visible.
            JobRepo::cancel_before_start(&ctx.pool, job_id, CANCELLED_MESSAGE).await?;
            return Ok(DispatchOutcome::Cancelled);
        }
        permit = ctx.admission.acquire() => permit?,
    };

    JobRepo::mark_running(&ctx.pool, job_id).await?;
    tracing::debug!(job_id = %job_id, in_use = ctx.admission.in_use(), "Admission slot acquired");

    let task = Task {
        job_id: job_id.clone(),
        payload,
    };
    let output = match ctx.workers.submit(task) {
        Ok(handle) => tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // Dropping `handle` abandons the wait; the pool skips the
                // task if no worker has picked it up yet.
                let outcome = record_cancelled(ctx, job_id).await;
                permit.release();
                return outcome;
            }
            output = handle => output.map_err(|e| e.to_string()),
        },
        Err(e) => Err(format!("PoolError: {e}")),
    };

    let outcome = match output {
        Ok(result) => {
            JobRepo::complete(&ctx.pool, job_id, &result).await?;
            DispatchOutcome::Succeeded(result)
        }
        Err(message) => {
            JobRepo::fail(&ctx.pool, job_id, &message).await?;
            DispatchOutcome::Failed(message)
        }
    };
    permit.release();
    Ok(outcome)
}

async fn record_cancelled(
    ctx: &EngineContext,
    job_id: &JobId,
) -> Result<DispatchOutcome, EngineError> {
    JobRepo::cancel(&ctx.pool, job_id, CANCELLED_MESSAGE).await?;
    Ok(DispatchOutcome::Cancelled)
}
