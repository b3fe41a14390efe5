//! Shared response envelope types for API handlers.
//!
//! Successful responses use a `{ "data": ... }` envelope.

use serde::Serialize;

use cruncher_core::types::JobId;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// A job id with a status string, returned by submit and cancel.
///
/// `status` is a [`cruncher_core::status::JobStatus`] name, or
/// `CANCEL_REQUESTED` from cancel.
#[derive(Debug, Serialize)]
pub struct JobRef {
    pub job_id: JobId,
    pub status: &'static str,
}
