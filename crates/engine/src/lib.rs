//! Job orchestration: admission control, dispatch across the worker-pool
//! boundary, cooperative cancellation and status persistence.
//!
//! [`JobEngine`] owns every piece of shared state (store pool, worker pool,
//! admission gate, cancellation registry) so independent engines can run
//! side by side in one process.

pub mod admission;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod registry;

pub use admission::{AdmissionController, AdmissionPermit};
pub use config::EngineConfig;
pub use dispatcher::DispatchOutcome;
pub use engine::{CancelOutcome, JobEngine, WaitOutcome};
pub use error::EngineError;
pub use registry::{CancelHandle, CancellationRegistry};
