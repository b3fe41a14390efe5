//! Fixed-size pool of dedicated OS threads.
//!
//! Threads pull envelopes off a shared queue, run the analyzer under
//! `catch_unwind`, and push the outcome back through the task's completion
//! channel. Nothing here touches the async runtime, so a slow or panicking
//! computation cannot stall the scheduler.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::pool::{PoolError, WorkerPool};
use crate::task::{Task, TaskCompleter, TaskError, TaskHandle};

/// The pure function the pool runs for every task.
pub type Analyzer =
    Arc<dyn Fn(&serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync>;

/// Analyzer backed by [`cruncher_core::analysis::run_payload`].
pub fn default_analyzer() -> Analyzer {
    Arc::new(|payload: &serde_json::Value| {
        cruncher_core::analysis::run_payload(payload).map_err(|e| e.to_string())
    })
}

struct Envelope {
    task: Task,
    completer: TaskCompleter,
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Envelope>>>;

pub struct ThreadPool {
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
    closed: Arc<AtomicBool>,
    size: usize,
}

impl ThreadPool {
    /// Spawn `size` worker threads (at least one) running `analyzer`.
    pub fn new(size: usize, analyzer: Analyzer) -> Result<Self, PoolError> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Envelope>();
        let receiver: SharedReceiver = Arc::new(Mutex::new(receiver));
        let closed = Arc::new(AtomicBool::new(false));

        for index in 0..size {
            let receiver = Arc::clone(&receiver);
            let analyzer = Arc::clone(&analyzer);
            let closed = Arc::clone(&closed);
            // Detached: shutdown abandons work rather than joining.
            thread::Builder::new()
                .name(format!("cruncher-worker-{index}"))
                .spawn(move || worker_loop(index, receiver, analyzer, closed))?;
        }

        tracing::info!(size, "Worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            closed,
            size,
        })
    }
}

impl WorkerPool for ThreadPool {
    fn submit(&self, task: Task) -> Result<TaskHandle, PoolError> {
        let guard = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        let sender = guard.as_ref().ok_or(PoolError::Closed)?;

        let (completer, handle) = TaskHandle::channel();
        sender
            .send(Envelope { task, completer })
            .map_err(|_| PoolError::Closed)?;
        Ok(handle)
    }

    fn size(&self) -> usize {
        self.size
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = self
            .sender
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if dropped.is_some() {
            tracing::info!(size = self.size, "Worker pool shut down");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    index: usize,
    receiver: SharedReceiver,
    analyzer: Analyzer,
    closed: Arc<AtomicBool>,
) {
    loop {
        // The guard is a temporary and is released before the task runs.
        let next = receiver.lock().unwrap_or_else(|p| p.into_inner()).recv();
        let Ok(Envelope { task, completer }) = next else {
            break;
        };

        if closed.load(Ordering::SeqCst) {
            // Dropping the completer resolves the waiter to `Abandoned`.
            continue;
        }
        if completer.is_abandoned() {
            tracing::debug!(worker = index, job_id = %task.job_id, "Skipping abandoned task");
            continue;
        }

        tracing::debug!(worker = index, job_id = %task.job_id, "Task started");
        let output = match panic::catch_unwind(AssertUnwindSafe(|| analyzer(&task.payload))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(TaskError::Failed(message)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(worker = index, job_id = %task.job_id, %message, "Task panicked");
                Err(TaskError::Panicked(message))
            }
        };
        completer.complete(output);
    }

    tracing::debug!(worker = index, "Worker thread exiting");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
