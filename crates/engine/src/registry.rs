//! Transient map from job id to the handle that cancels its dispatch.
//!
//! This is a cache of in-flight dispatches, not a source of truth: an id
//! missing from here may still be `PENDING` or `RUNNING` in the store.

use std::collections::HashMap;

use cruncher_core::types::JobId;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Requests cancellation of one dispatch.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Ask the dispatch to stop waiting. Idempotent.
    pub fn request_cancel(&self) {
        self.token.cancel();
    }

    /// The token the dispatch observes.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Thread-safe via interior `RwLock`; shared through the engine context.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    handles: RwLock<HashMap<JobId, CancelHandle>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, job_id: JobId, handle: CancelHandle) {
        self.handles.write().await.insert(job_id, handle);
    }

    pub async fn unregister(&self, job_id: &JobId) -> Option<CancelHandle> {
        self.handles.write().await.remove(job_id)
    }

    /// Request cancellation if a dispatch for `job_id` is registered.
    ///
    /// Returns `false` when nothing is registered.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        match self.handles.read().await.get(job_id) {
            Some(handle) => {
                handle.request_cancel();
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, job_id: &JobId) -> bool {
        self.handles.read().await.contains_key(job_id)
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}
