//! Route definitions for the job endpoints.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Job routes, mounted at the root.
///
/// ```text
/// POST   /jobs              -> submit_job
/// GET    /jobs/{id}         -> get_job
/// POST   /jobs/{id}/cancel  -> cancel_job
/// POST   /jobs_sync         -> submit_job_sync
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(jobs::submit_job))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/jobs_sync", post(jobs::submit_job_sync))
}
