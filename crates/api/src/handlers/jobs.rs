//! Handlers for the `/jobs` resource.
//!
//! Thin adapters over [`cruncher_engine::JobEngine`]: extract, call, wrap the
//! result in [`DataResponse`].

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use cruncher_core::analysis::AnalysisRequest;
use cruncher_core::types::JobId;
use cruncher_engine::WaitOutcome;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::response::{DataResponse, JobRef};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Unreadable or mistyped bodies are reported as 400.
fn bad_body(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /jobs
///
/// Persist a `PENDING` job and start it in the background. Returns 201.
pub async fn submit_job(
    State(state): State<AppState>,
    input: Result<Json<AnalysisRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = input.map_err(bad_body)?;
    let job = state.engine.submit(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: JobRef {
                job_id: job.job_id,
                status: job.status.as_str(),
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.engine.get_status(&JobId::from(id)).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /jobs/{id}/cancel
///
/// `CANCEL_REQUESTED` when a live dispatch was signalled, otherwise the
/// job's persisted status. Cancellation lands asynchronously; poll
/// `GET /jobs/{id}` for the outcome.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = JobId::from(id);
    let outcome = state.engine.cancel(&job_id).await?;

    Ok(Json(DataResponse {
        data: JobRef {
            job_id,
            status: outcome.as_str(),
        },
    }))
}

// ---------------------------------------------------------------------------
// Submit and wait
// ---------------------------------------------------------------------------

/// POST /jobs_sync
///
/// Submit and hold the request open until the job is terminal.
///
/// Axum drops this future when the client disconnects, so the wait runs in
/// its own task and a drop guard on `disconnected` tells it the caller is
/// gone. The guard is disarmed once the wait finishes normally.
pub async fn submit_job_sync(
    State(state): State<AppState>,
    input: Result<Json<AnalysisRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = input.map_err(bad_body)?;
    let disconnected = CancellationToken::new();
    let guard = disconnected.clone().drop_guard();

    let engine = state.engine.clone();
    let wait = tokio::spawn(async move {
        engine
            .submit_and_wait(input, disconnected.cancelled_owned())
            .await
    });

    let joined = wait.await;
    guard.disarm();

    match joined.map_err(|e| AppError::InternalError(format!("wait task failed: {e}")))?? {
        WaitOutcome::Completed(job) => Ok(Json(DataResponse { data: job })),
        WaitOutcome::Abandoned { job_id, .. } => Err(AppError::ClientClosed(job_id)),
    }
}
