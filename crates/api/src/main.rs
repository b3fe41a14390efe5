use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cruncher_api::config::ServerConfig;
use cruncher_api::router::build_app_router;
use cruncher_api::state::AppState;
use cruncher_engine::{EngineConfig, JobEngine};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cruncher_api=debug,cruncher_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let engine_config = EngineConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        db_path = %engine_config.db_path.display(),
        max_concurrency = engine_config.max_concurrency,
        max_workers = engine_config.max_workers,
        "Loaded configuration",
    );

    // --- Engine (opens and migrates the job database) ---
    let engine = JobEngine::from_config(&engine_config)
        .await
        .expect("Failed to start job engine");

    // Jobs left RUNNING by a previous process are reported, not repaired.
    match engine.orphaned_jobs(engine_config.stale_running_after).await {
        Ok(orphans) => {
            for job in &orphans {
                tracing::warn!(
                    job_id = %job.job_id,
                    updated_at = %job.updated_at,
                    "Found orphaned RUNNING job",
                );
            }
        }
        Err(e) => tracing::error!(error = %e, "Orphan scan failed"),
    }

    // --- App state ---
    let state = AppState::new(engine.clone(), config.clone());
    let app = build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!(
        in_flight = engine.in_flight().await,
        "Server stopped accepting connections, abandoning outstanding jobs",
    );
    engine.shutdown();
    engine.db().close().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
