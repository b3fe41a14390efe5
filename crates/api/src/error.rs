use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cruncher_core::error::CoreError;
use cruncher_core::types::JobId;
use cruncher_db::StoreError;
use cruncher_engine::EngineError;
use serde_json::json;

/// Non-standard status for a caller that went away before its answer.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`EngineError`] for everything the engine can report and adds
/// HTTP-specific variants. Implements [`IntoResponse`] to produce
/// consistent `{"error", "code"}` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `cruncher_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An error from the job engine or the store beneath it.
    #[error(transparent)]
    Engine(EngineError),

    /// The caller disconnected while waiting; the job was cancelled.
    #[error("Client closed request while waiting for job {0}")]
    ClientClosed(JobId),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Core(core) => AppError::Core(core),
            other => AppError::Engine(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Engine(engine) => classify_engine_error(engine),
            AppError::ClientClosed(_) => (
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST),
                "CLIENT_CLOSED_REQUEST",
                self.to_string(),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::UnknownStatus(msg) => internal(msg),
        CoreError::Internal(msg) => internal(msg),
    }
}

fn classify_engine_error(err: &EngineError) -> (StatusCode, &'static str, String) {
    match err {
        EngineError::Core(core) => classify_core_error(core),
        EngineError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Job with id {id} not found"),
        ),
        EngineError::Store(store) => classify_store_error(store),
        EngineError::AdmissionClosed => (
            StatusCode::SERVICE_UNAVAILABLE,
            "SHUTTING_DOWN",
            "Server is shutting down".to_string(),
        ),
        EngineError::Pool(e) => internal(&e.to_string()),
        EngineError::Internal(msg) => internal(msg),
    }
}

fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Job with id {id} not found"),
        ),
        StoreError::DuplicateId(_) | StoreError::InvalidTransition { .. } => {
            (StatusCode::CONFLICT, "CONFLICT", err.to_string())
        }
        other => internal(&other.to_string()),
    }
}

/// Log the real cause and return a sanitized 500.
fn internal(msg: &str) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %msg, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
