use cruncher_core::error::CoreError;
use cruncher_core::types::JobId;
use cruncher_db::StoreError;
use cruncher_worker::PoolError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Rejected before a job id was created; nothing was persisted.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Job {0} not found")]
    NotFound(JobId),

    /// Durable storage failed; the caller must see it.
    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Admission controller is closed")]
    AdmissionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Store(other),
        }
    }
}
