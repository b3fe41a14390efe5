use crate::task::{Task, TaskHandle};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool has been shut down and accepts no new work.
    #[error("worker pool is closed")]
    Closed,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Submit/await contract of a fixed-size pool of isolated execution units.
///
/// `submit` never blocks. Dropping the returned [`TaskHandle`] abandons the
/// wait; it does not preempt a unit that has already started the task.
pub trait WorkerPool: Send + Sync + 'static {
    fn submit(&self, task: Task) -> Result<TaskHandle, PoolError>;

    /// Number of execution units, fixed at construction.
    fn size(&self) -> usize;

    /// Stop accepting work. Queued and in-flight tasks are abandoned, not awaited.
    fn shutdown(&self);
}
