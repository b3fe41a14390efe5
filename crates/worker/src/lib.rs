//! Worker pool: the boundary between the async scheduler and OS-level
//! parallel CPU work.
//!
//! Work crosses the boundary as a serializable [`Task`] and comes back as a
//! JSON result or a [`TaskError`] on a one-shot completion channel. The
//! dispatcher only sees the [`WorkerPool`] trait, so the thread pool here can
//! be swapped for processes or remote workers without touching it.

pub mod pool;
pub mod task;
pub mod thread_pool;

pub use pool::{PoolError, WorkerPool};
pub use task::{Task, TaskCompleter, TaskError, TaskHandle, TaskOutput};
pub use thread_pool::{default_analyzer, Analyzer, ThreadPool};
