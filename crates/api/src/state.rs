use std::sync::Arc;

use cruncher_engine::JobEngine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: the engine is an `Arc` handle and the pool is
/// reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool, shared with the engine.
    pub pool: cruncher_db::DbPool,
    /// Job orchestration engine.
    pub engine: JobEngine,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(engine: JobEngine, config: ServerConfig) -> Self {
        Self {
            pool: engine.db().clone(),
            engine,
            config: Arc::new(config),
        }
    }
}
