#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::SqlitePool;
use tower::ServiceExt;

use cruncher_api::config::ServerConfig;
use cruncher_api::router::build_app_router;
use cruncher_api::state::AppState;
use cruncher_core::analysis::run_payload;
use cruncher_engine::JobEngine;
use cruncher_worker::{Analyzer, ThreadPool};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

/// The real analysis, preceded by a sleep of `meta.ms` milliseconds so
/// tests can hold a job open.
pub fn slow_analyzer() -> Analyzer {
    Arc::new(|payload: &serde_json::Value| -> Result<serde_json::Value, String> {
        let ms = payload["meta"]["ms"].as_u64().unwrap_or(0);
        std::thread::sleep(Duration::from_millis(ms));
        run_payload(payload).map_err(|e| e.to_string())
    })
}

/// Engine over `pool` with two workers and two admission slots.
pub fn test_engine(pool: SqlitePool) -> JobEngine {
    let workers = ThreadPool::new(2, slow_analyzer()).unwrap();
    JobEngine::new(pool, Arc::new(workers), 2)
}

/// Build the full application router with all middleware layers.
pub fn build_test_app(pool: SqlitePool) -> Router {
    build_app_router(AppState::new(test_engine(pool), test_config()))
}

/// Same as [`build_test_app`] but also hands back the engine.
pub fn build_test_app_with_engine(pool: SqlitePool) -> (Router, JobEngine) {
    let engine = test_engine(pool);
    let app = build_app_router(AppState::new(engine.clone(), test_config()));
    (app, engine)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `GET /jobs/{id}` until the job reaches a terminal status.
pub async fn wait_terminal(app: Router, job_id: &str) -> serde_json::Value {
    let terminal = ["SUCCEEDED", "FAILED", "CANCELLED"];
    for _ in 0..500 {
        let json = body_json(get(app.clone(), &format!("/jobs/{job_id}")).await).await;
        if terminal.contains(&json["data"]["status"].as_str().unwrap_or_default()) {
            return json["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never finished");
}
