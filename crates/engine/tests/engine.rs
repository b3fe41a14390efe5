//! End-to-end tests for the orchestration engine against a real SQLite file
//! and a real thread pool.
//!
//! The test analyzer understands a few `meta` keys so timing and failure
//! can be driven from the request: `ms` (sleep), `fail` (return an error)
//! and `panic`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use cruncher_core::analysis::{run_payload, AnalysisRequest};
use cruncher_core::error::CoreError;
use cruncher_core::status::JobStatus;
use cruncher_core::types::JobId;
use cruncher_db::models::job::Job;
use cruncher_db::repositories::JobRepo;
use cruncher_engine::dispatcher::CANCELLED_MESSAGE;
use cruncher_engine::{CancelOutcome, EngineError, JobEngine, WaitOutcome};
use cruncher_worker::{Analyzer, ThreadPool};
use serde_json::{json, Value};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Probe {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

fn test_analyzer(probe: Arc<Probe>) -> Analyzer {
    Arc::new(move |payload: &Value| -> Result<Value, String> {
        probe.calls.fetch_add(1, Ordering::SeqCst);
        let now = probe.current.fetch_add(1, Ordering::SeqCst) + 1;
        probe.peak.fetch_max(now, Ordering::SeqCst);

        let meta = &payload["meta"];
        let ms = meta["ms"].as_u64().unwrap_or(0);
        std::thread::sleep(Duration::from_millis(ms));
        probe.current.fetch_sub(1, Ordering::SeqCst);

        if meta["panic"].as_bool() == Some(true) {
            panic!("analyzer blew up");
        }
        if meta["fail"].as_bool() == Some(true) {
            return Err("boom".to_string());
        }
        run_payload(payload).map_err(|e| e.to_string())
    })
}

struct Harness {
    engine: JobEngine,
    probe: Arc<Probe>,
    _dir: TempDir,
}

async fn harness(workers: usize, max_concurrency: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let pool = cruncher_db::open(dir.path().join("jobs.sqlite3")).await.unwrap();
    let probe = Arc::new(Probe::default());
    let threads = ThreadPool::new(workers, test_analyzer(Arc::clone(&probe))).unwrap();
    let engine = JobEngine::new(pool, Arc::new(threads), max_concurrency);
    Harness {
        engine,
        probe,
        _dir: dir,
    }
}

fn request(n: u64, meta: Value) -> AnalysisRequest {
    serde_json::from_value(json!({ "n": n, "meta": meta })).unwrap()
}

fn sleepy(ms: u64) -> AnalysisRequest {
    request(10, json!({ "ms": ms }))
}

async fn wait_for<F>(engine: &JobEngine, id: &JobId, done: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let job = engine.get_status(id).await.unwrap();
        if done(&job) {
            return job;
        }
        assert!(Instant::now() < deadline, "job {id} stuck at {}", job.status);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_terminal(engine: &JobEngine, id: &JobId) -> Job {
    wait_for(engine, id, |job| job.status.is_terminal()).await
}

/// Jobs the store currently reports as `RUNNING`.
async fn persisted_running(engine: &JobEngine) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE status = 'RUNNING'")
        .fetch_one(engine.db())
        .await
        .unwrap()
}

/// Poll until every job is terminal, checking on each pass that neither the
/// admission gate nor the store ever shows more than `limit` running jobs.
async fn watch_until_terminal(engine: &JobEngine, ids: &[JobId], limit: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        assert!(engine.admission().in_use() <= limit);
        let running = persisted_running(engine).await;
        assert!(running <= limit as i64, "{running} jobs RUNNING, limit {limit}");

        let mut terminal = 0;
        for id in ids {
            if engine.get_status(id).await.unwrap().status.is_terminal() {
                terminal += 1;
            }
        }
        if terminal == ids.len() {
            return;
        }
        assert!(Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

async fn wait_idle(engine: &JobEngine) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.in_flight().await > 0 {
        assert!(Instant::now() < deadline, "dispatches never unregistered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Submit / status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_pending_record() {
    let h = harness(2, 2).await;

    let job = h.engine.submit(sleepy(100)).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.job_id.as_str().len(), 32);
    assert!(job.result.is_none());
    assert!(job.error.is_none());

    let stored = h.engine.get_status(&job.job_id).await.unwrap();
    assert_eq!(stored.job_id, job.job_id);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = harness(1, 1).await;
    let id = JobId::from("nope");
    assert_matches!(h.engine.get_status(&id).await, Err(EngineError::NotFound(missing)) if missing == id);
}

#[tokio::test]
async fn invalid_request_is_rejected_before_persisting() {
    let h = harness(1, 1).await;
    let err = h.engine.submit(request(0, json!({}))).await.unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
    assert_eq!(h.engine.in_flight().await, 0);
}

#[tokio::test]
async fn job_round_trips_to_succeeded() {
    let h = harness(2, 2).await;

    let job = h.engine.submit(request(5, json!({ "k": "v" }))).await.unwrap();
    let done = wait_terminal(&h.engine, &job.job_id).await;

    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.result, Some(json!({ "score": 30, "n": 5, "meta": { "k": "v" } })));
    assert!(done.error.is_none());
    assert_eq!(done.payload, json!({ "n": 5, "meta": { "k": "v" } }));
    assert!(done.updated_at >= done.created_at);

    wait_idle(&h.engine).await;
}

#[tokio::test]
async fn analyzer_error_fails_job() {
    let h = harness(1, 1).await;

    let job = h.engine.submit(request(5, json!({ "fail": true }))).await.unwrap();
    let done = wait_terminal(&h.engine, &job.job_id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error.as_deref(), Some("AnalysisError: boom"));
    assert!(done.result.is_none());
}

#[tokio::test]
async fn analyzer_panic_fails_job_and_pool_keeps_serving() {
    let h = harness(1, 1).await;

    let bad = h.engine.submit(request(5, json!({ "panic": true }))).await.unwrap();
    let done = wait_terminal(&h.engine, &bad.job_id).await;
    assert_eq!(done.status, JobStatus::Failed);
    assert_matches!(done.error.as_deref(), Some(msg) if msg.starts_with("WorkerPanic:"));

    let good = h.engine.submit(request(3, json!({}))).await.unwrap();
    let done = wait_terminal(&h.engine, &good.job_id).await;
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.result.unwrap()["score"], json!(5));
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admission_bounds_concurrent_execution() {
    let h = harness(4, 2).await;

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(h.engine.submit(sleepy(150)).await.unwrap().job_id);
    }
    // Queued behind the others, so this one is cancelled before admission.
    let dropped = h.engine.submit(sleepy(150)).await.unwrap().job_id;
    assert_eq!(
        h.engine.cancel(&dropped).await.unwrap(),
        CancelOutcome::CancelRequested
    );

    let mut all = ids.clone();
    all.push(dropped.clone());
    watch_until_terminal(&h.engine, &all, 2).await;

    assert!(h.probe.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(h.probe.calls.load(Ordering::SeqCst), 5);
    for id in &ids {
        let job = h.engine.get_status(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
    }
    let cancelled = h.engine.get_status(&dropped).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_MESSAGE));
}

#[tokio::test]
async fn concurrency_is_clamped_to_pool_size() {
    let h = harness(2, 16).await;
    assert_eq!(h.engine.admission().capacity(), 2);

    let h = harness(2, 0).await;
    assert_eq!(h.engine.admission().capacity(), 1);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_running_job() {
    let h = harness(1, 1).await;

    let job = h.engine.submit(sleepy(2_000)).await.unwrap();
    wait_for(&h.engine, &job.job_id, |j| j.status == JobStatus::Running).await;

    let outcome = h.engine.cancel(&job.job_id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::CancelRequested);
    assert_eq!(outcome.as_str(), "CANCEL_REQUESTED");

    let done = wait_terminal(&h.engine, &job.job_id).await;
    assert_eq!(done.status, JobStatus::Cancelled);
    assert_eq!(done.error.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(done.result.is_none());

    wait_idle(&h.engine).await;
    assert!(!h.engine.is_in_flight(&job.job_id).await);
}

#[tokio::test]
async fn cancel_job_waiting_for_admission() {
    let h = harness(1, 1).await;

    let first = h.engine.submit(sleepy(300)).await.unwrap();
    wait_for(&h.engine, &first.job_id, |j| j.status == JobStatus::Running).await;

    let second = h.engine.submit(sleepy(0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        h.engine.get_status(&second.job_id).await.unwrap().status,
        JobStatus::Pending
    );

    assert_eq!(
        h.engine.cancel(&second.job_id).await.unwrap(),
        CancelOutcome::CancelRequested
    );
    let cancelled = wait_terminal(&h.engine, &second.job_id).await;
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let finished = wait_terminal(&h.engine, &first.job_id).await;
    assert_eq!(finished.status, JobStatus::Succeeded);

    // The cancelled job never reached a worker.
    assert_eq!(h.probe.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_queued_job_never_counts_as_running() {
    let h = harness(1, 1).await;

    let first = h.engine.submit(sleepy(300)).await.unwrap().job_id;
    wait_for(&h.engine, &first, |j| j.status == JobStatus::Running).await;
    let queued = h.engine.submit(sleepy(0)).await.unwrap().job_id;
    let last = h.engine.submit(sleepy(0)).await.unwrap().job_id;

    let ids = [first.clone(), queued.clone(), last.clone()];
    let watcher = {
        let engine = h.engine.clone();
        let ids = ids.clone();
        tokio::spawn(async move { watch_until_terminal(&engine, &ids, 1).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        h.engine.cancel(&queued).await.unwrap(),
        CancelOutcome::CancelRequested
    );
    watcher.await.unwrap();

    assert_eq!(h.engine.get_status(&first).await.unwrap().status, JobStatus::Succeeded);
    assert_eq!(h.engine.get_status(&queued).await.unwrap().status, JobStatus::Cancelled);
    assert_eq!(h.engine.get_status(&last).await.unwrap().status, JobStatus::Succeeded);
    assert_eq!(h.probe.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancel_racing_completion_never_reports_stale_status() {
    let h = harness(2, 2).await;

    for _ in 0..20 {
        let id = h.engine.submit(request(3, json!({}))).await.unwrap().job_id;
        tokio::task::yield_now().await;

        match h.engine.cancel(&id).await.unwrap() {
            CancelOutcome::CancelRequested => {
                let done = wait_terminal(&h.engine, &id).await;
                assert_matches!(done.status, JobStatus::Succeeded | JobStatus::Cancelled);
            }
            // No live dispatch means the outcome is already persisted.
            CancelOutcome::Current(status) => {
                assert!(status.is_terminal(), "stale {status} reported");
                let stored = h.engine.get_status(&id).await.unwrap();
                assert_eq!(stored.status, status);
            }
        }
    }
    wait_idle(&h.engine).await;
}

#[tokio::test]
async fn cancel_finished_job_reports_its_status() {
    let h = harness(1, 1).await;

    let job = h.engine.submit(request(5, json!({}))).await.unwrap();
    wait_terminal(&h.engine, &job.job_id).await;

    let outcome = h.engine.cancel(&job.job_id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Current(JobStatus::Succeeded));
    assert_eq!(outcome.as_str(), "SUCCEEDED");

    let job = h.engine.get_status(&job.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let h = harness(1, 1).await;
    assert_matches!(
        h.engine.cancel(&JobId::from("ghost")).await,
        Err(EngineError::NotFound(_))
    );
}

#[tokio::test]
async fn cancel_without_live_dispatch_reports_stored_status() {
    let h = harness(1, 1).await;

    // A row no dispatch owns, as left behind by a previous process.
    let id = JobId::generate();
    JobRepo::insert(h.engine.db(), &id, &json!({ "n": 1 })).await.unwrap();

    let outcome = h.engine.cancel(&id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Current(JobStatus::Pending));
}

// ---------------------------------------------------------------------------
// Submit and wait
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_and_wait_returns_final_record() {
    let h = harness(2, 2).await;

    let outcome = h
        .engine
        .submit_and_wait(request(5, json!({ "k": "v" })), std::future::pending())
        .await
        .unwrap();

    let job = assert_matches!(outcome, WaitOutcome::Completed(job) => job);
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.result, Some(json!({ "score": 30, "n": 5, "meta": { "k": "v" } })));
}

#[tokio::test]
async fn submit_and_wait_reports_failure_as_record() {
    let h = harness(1, 1).await;

    let outcome = h
        .engine
        .submit_and_wait(request(5, json!({ "fail": true })), std::future::pending())
        .await
        .unwrap();

    let job = assert_matches!(outcome, WaitOutcome::Completed(job) => job);
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn disconnect_abandons_and_cancels() {
    let h = harness(1, 1).await;
    let started = Instant::now();

    let outcome = h
        .engine
        .submit_and_wait(
            sleepy(3_000),
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    let (job_id, cancel) = assert_matches!(
        outcome,
        WaitOutcome::Abandoned { job_id, cancel } => (job_id, cancel)
    );
    assert_eq!(cancel, CancelOutcome::CancelRequested);

    let job = wait_terminal(&h.engine, &job_id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error.as_deref(), Some(CANCELLED_MESSAGE));
}

#[tokio::test]
async fn submit_and_wait_rejects_invalid_request() {
    let h = harness(1, 1).await;
    let err = h
        .engine
        .submit_and_wait(request(0, json!({})), std::future::pending())
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Orphans and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_running_rows_are_reported_as_orphans() {
    let h = harness(1, 1).await;

    let id = JobId::generate();
    JobRepo::insert(h.engine.db(), &id, &json!({ "n": 1 })).await.unwrap();
    JobRepo::mark_running(h.engine.db(), &id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let orphans = h.engine.orphaned_jobs(Duration::from_millis(5)).await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].job_id, id);

    assert!(h
        .engine
        .orphaned_jobs(Duration::from_secs(3600))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn shutdown_stops_admitting() {
    let h = harness(1, 1).await;

    let running = h.engine.submit(sleepy(200)).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while h.probe.calls.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "task never reached a worker");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let waiting = h.engine.submit(sleepy(0)).await.unwrap();

    h.engine.shutdown();

    assert_matches!(
        h.engine.submit(sleepy(0)).await,
        Err(EngineError::AdmissionClosed)
    );

    // Work already on a worker finishes; the queued job keeps its last status.
    let done = wait_terminal(&h.engine, &running.job_id).await;
    assert_eq!(done.status, JobStatus::Succeeded);
    wait_idle(&h.engine).await;
    assert_eq!(
        h.engine.get_status(&waiting.job_id).await.unwrap().status,
        JobStatus::Pending
    );
}
