use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use cruncher_core::types::JobId;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// A unit of CPU work addressed to the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub job_id: JobId,
    pub payload: serde_json::Value,
}

/// Why a task produced no result.
///
/// The `Display` form is what ends up in the job's `error` column.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The computation itself reported an error.
    #[error("AnalysisError: {0}")]
    Failed(String),

    /// The computation panicked; the worker survived.
    #[error("WorkerPanic: {0}")]
    Panicked(String),

    /// The pool dropped the task without completing it (shutdown).
    #[error("WorkerLost: task abandoned by the worker pool")]
    Abandoned,
}

pub type TaskOutput = Result<serde_json::Value, TaskError>;

/// Pool-side half of a task's completion channel.
#[derive(Debug)]
pub struct TaskCompleter {
    tx: oneshot::Sender<TaskOutput>,
}

impl TaskCompleter {
    /// Deliver the outcome. A waiter that has gone away is not an error.
    pub fn complete(self, output: TaskOutput) {
        let _ = self.tx.send(output);
    }

    /// True once the matching [`TaskHandle`] has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Caller-side half: a future resolving to the task's outcome.
///
/// Cancel-safe. Dropping it is how a dispatch abandons its wait.
#[derive(Debug)]
pub struct TaskHandle {
    rx: oneshot::Receiver<TaskOutput>,
}

impl TaskHandle {
    /// Create a linked completer/handle pair.
    pub fn channel() -> (TaskCompleter, TaskHandle) {
        let (tx, rx) = oneshot::channel();
        (TaskCompleter { tx }, TaskHandle { rx })
    }
}

impl Future for TaskHandle {
    type Output = TaskOutput;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(output) => output,
            Err(_) => Err(TaskError::Abandoned),
        })
    }
}
