use std::path::PathBuf;
use std::time::Duration;

/// Default number of jobs allowed to execute at once.
const DEFAULT_MAX_CONCURRENCY: usize = 2;

/// Default job database file.
const DEFAULT_DB_PATH: &str = "jobs.sqlite3";

/// Default age after which a `RUNNING` row with no updates counts as orphaned.
const DEFAULT_STALE_RUNNING_SECS: u64 = 300;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite file backing the job store.
    pub db_path: PathBuf,
    /// Admission slots. Kept at or below `max_workers`.
    pub max_concurrency: usize,
    /// Worker pool threads, fixed for the life of the process.
    pub max_workers: usize,
    /// Threshold for reporting orphaned `RUNNING` jobs.
    pub stale_running_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_workers: default_workers(),
            stale_running_after: Duration::from_secs(DEFAULT_STALE_RUNNING_SECS),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default              |
    /// |----------------------|----------------------|
    /// | `JOB_DB_PATH`        | `jobs.sqlite3`       |
    /// | `MAX_CONCURRENCY`    | `2`                  |
    /// | `MAX_WORKERS`        | available CPUs       |
    /// | `STALE_RUNNING_SECS` | `300`                |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let db_path = std::env::var("JOB_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let max_concurrency = env_parse("MAX_CONCURRENCY").unwrap_or(defaults.max_concurrency);
        let max_workers = env_parse("MAX_WORKERS").unwrap_or(defaults.max_workers);
        let stale_running_after = env_parse("STALE_RUNNING_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.stale_running_after);

        Self {
            db_path,
            max_concurrency,
            max_workers,
            stale_running_after,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
