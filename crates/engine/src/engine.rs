//! The orchestration context and the operations exposed to transports.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cruncher_core::analysis::AnalysisRequest;
use cruncher_core::status::JobStatus;
use cruncher_core::types::JobId;
use cruncher_db::models::job::Job;
use cruncher_db::repositories::JobRepo;
use cruncher_db::DbPool;
use cruncher_worker::{default_analyzer, ThreadPool, WorkerPool};
use tokio::task::JoinHandle;

use crate::admission::AdmissionController;
use crate::config::EngineConfig;
use crate::dispatcher::{dispatch, DispatchOutcome};
use crate::error::EngineError;
use crate::registry::{CancelHandle, CancellationRegistry};

/// Everything a dispatch routine touches, passed explicitly to each one.
pub(crate) struct EngineContext {
    pub(crate) pool: DbPool,
    pub(crate) workers: Arc<dyn WorkerPool>,
    pub(crate) admission: AdmissionController,
    pub(crate) registry: CancellationRegistry,
}

/// Result of [`JobEngine::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A live dispatch was asked to stop. It may still finish first.
    CancelRequested,
    /// No live dispatch to signal; this is the persisted status.
    Current(JobStatus),
}

impl CancelOutcome {
    /// `CANCEL_REQUESTED` or the persisted status name.
    pub fn as_str(self) -> &'static str {
        match self {
            CancelOutcome::CancelRequested => "CANCEL_REQUESTED",
            CancelOutcome::Current(status) => status.as_str(),
        }
    }
}

/// Result of [`JobEngine::submit_and_wait`].
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The job reached a terminal status; this is its final record.
    Completed(Job),
    /// The caller went away first. Cancellation was requested.
    Abandoned { job_id: JobId, cancel: CancelOutcome },
}

type DispatchHandle = JoinHandle<Result<DispatchOutcome, EngineError>>;

/// Cheaply cloneable handle to one orchestration context.
#[derive(Clone)]
pub struct JobEngine {
    ctx: Arc<EngineContext>,
}

impl JobEngine {
    /// Build an engine over an existing store and worker pool.
    ///
    /// `max_concurrency` is clamped to `1..=workers.size()` so jobs never
    /// queue inside the pool where admission cannot see them.
    pub fn new(pool: DbPool, workers: Arc<dyn WorkerPool>, max_concurrency: usize) -> Self {
        let pool_size = workers.size().max(1);
        let slots = max_concurrency.clamp(1, pool_size);
        if slots != max_concurrency {
            tracing::warn!(
                requested = max_concurrency,
                pool_size,
                using = slots,
                "Adjusted max_concurrency to fit the worker pool",
            );
        }

        Self {
            ctx: Arc::new(EngineContext {
                pool,
                workers,
                admission: AdmissionController::new(slots),
                registry: CancellationRegistry::new(),
            }),
        }
    }

    /// Open the configured database and start a thread pool running the
    /// default analysis.
    pub async fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let pool = cruncher_db::open(&config.db_path).await?;
        let workers = ThreadPool::new(config.max_workers, default_analyzer())?;
        Ok(Self::new(pool, Arc::new(workers), config.max_concurrency))
    }

    pub fn db(&self) -> &DbPool {
        &self.ctx.pool
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.ctx.admission
    }

    /// Validate, persist as `PENDING` and start dispatching in the background.
    ///
    /// Returns as soon as the record exists.
    pub async fn submit(&self, request: AnalysisRequest) -> Result<Job, EngineError> {
        let (job, _dispatch) = self.start(request).await?;
        Ok(job)
    }

    async fn start(&self, request: AnalysisRequest) -> Result<(Job, DispatchHandle), EngineError> {
        if self.ctx.admission.is_closed() {
            return Err(EngineError::AdmissionClosed);
        }
        let payload = request.into_payload()?;
        let job_id = JobId::generate();
        let job = JobRepo::insert(&self.ctx.pool, &job_id, &payload).await?;

        // Registered before the dispatch exists, so a cancel can never miss it.
        let handle = CancelHandle::default();
        let token = handle.token();
        self.ctx.registry.register(job_id.clone(), handle).await;

        let dispatch = tokio::spawn(dispatch(
            Arc::clone(&self.ctx),
            job_id.clone(),
            payload,
            token,
        ));
        tracing::info!(job_id = %job_id, "Job submitted");

        Ok((job, dispatch))
    }

    /// Current persisted record.
    pub async fn get_status(&self, job_id: &JobId) -> Result<Job, EngineError> {
        Ok(JobRepo::get(&self.ctx.pool, job_id).await?)
    }

    /// Ask a job to stop.
    ///
    /// Terminal jobs report their status. Otherwise a registered dispatch is
    /// signalled and `CancelRequested` comes back; with nothing registered
    /// the persisted status is reported as-is.
    pub async fn cancel(&self, job_id: &JobId) -> Result<CancelOutcome, EngineError> {
        let job = self.get_status(job_id).await?;
        if job.status.is_terminal() {
            return Ok(CancelOutcome::Current(job.status));
        }

        if self.ctx.registry.cancel(job_id).await {
            tracing::info!(job_id = %job_id, "Cancellation requested");
            return Ok(CancelOutcome::CancelRequested);
        }

        // The dispatch may have persisted its outcome and unregistered
        // since the first read.
        let current = self.get_status(job_id).await?;
        Ok(CancelOutcome::Current(current.status))
    }

    /// Submit and wait for the terminal record, unless `disconnected`
    /// resolves first, in which case the job is cancelled and reported as
    /// abandoned without waiting for the cancellation to land.
    pub async fn submit_and_wait<F>(
        &self,
        request: AnalysisRequest,
        disconnected: F,
    ) -> Result<WaitOutcome, EngineError>
    where
        F: Future<Output = ()>,
    {
        let (job, mut dispatch) = self.start(request).await?;
        let job_id = job.job_id;

        tokio::select! {
            joined = &mut dispatch => {
                joined.map_err(|e| EngineError::Internal(format!("dispatch task failed: {e}")))??;
                let record = self.get_status(&job_id).await?;
                Ok(WaitOutcome::Completed(record))
            }
            () = disconnected => {
                let cancel = self.cancel(&job_id).await?;
                tracing::info!(job_id = %job_id, outcome = cancel.as_str(), "Caller disconnected, job abandoned");
                Ok(WaitOutcome::Abandoned { job_id, cancel })
            }
        }
    }

    /// `RUNNING` jobs not updated within `threshold`.
    ///
    /// Left behind when the process stops mid-dispatch. Reported only; no
    /// reconciliation is attempted.
    pub async fn orphaned_jobs(&self, threshold: Duration) -> Result<Vec<Job>, EngineError> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let jobs = JobRepo::list_stale_running(&self.ctx.pool, Utc::now() - threshold).await?;
        Ok(jobs)
    }

    /// Dispatches currently registered for cancellation.
    pub async fn in_flight(&self) -> usize {
        self.ctx.registry.len().await
    }

    pub async fn is_in_flight(&self, job_id: &JobId) -> bool {
        self.ctx.registry.contains(job_id).await
    }

    /// Stop admitting and abandon the worker pool without waiting.
    ///
    /// New submissions are rejected. Dispatches still waiting for a slot
    /// give up and leave their rows `PENDING`; tasks already on a worker
    /// run to completion.
    pub fn shutdown(&self) {
        self.ctx.admission.close();
        self.ctx.workers.shutdown();
        tracing::info!("Job engine shut down");
    }
}
