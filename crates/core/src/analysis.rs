//! The CPU-bound analysis job: its input, its output and the pure function
//! that turns one into the other.
//!
//! Everything here crosses the worker-pool boundary as JSON, so the worker
//! side only ever sees `serde_json::Value` in and out.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

/// Loop size used when a request does not specify `n`.
pub const DEFAULT_N: u64 = 30_000_000;

/// Modulus applied to every squared index.
const SCORE_MODULUS: u64 = 97;

fn default_n() -> u64 {
    DEFAULT_N
}

/// Input payload for an analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AnalysisRequest {
    /// CPU-heavy loop size.
    #[serde(default = "default_n")]
    #[validate(range(min = 1))]
    pub n: u64,
    /// Caller-supplied metadata, echoed back untouched in the result.
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl AnalysisRequest {
    /// Validate and serialize into the payload that gets persisted and
    /// shipped to the worker pool.
    pub fn into_payload(self) -> Result<serde_json::Value, CoreError> {
        self.validate()?;
        serde_json::to_value(self).map_err(|e| CoreError::Internal(e.to_string()))
    }
}

/// Output of [`analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub score: u64,
    pub n: u64,
    pub meta: serde_json::Map<String, serde_json::Value>,
}

/// Sum of `i * i mod 97` over `0..n`.
///
/// Deliberately a tight loop with no I/O; this is what the worker pool
/// exists to keep off the scheduler threads.
pub fn analyze(request: &AnalysisRequest) -> AnalysisResult {
    let score = (0..request.n)
        .map(|i| {
            let r = i % SCORE_MODULUS;
            (r * r) % SCORE_MODULUS
        })
        .sum();

    AnalysisResult {
        score,
        n: request.n,
        meta: request.meta.clone(),
    }
}

/// JSON-in, JSON-out wrapper around [`analyze`] used by worker threads.
pub fn run_payload(payload: &serde_json::Value) -> Result<serde_json::Value, CoreError> {
    let request: AnalysisRequest = serde_json::from_value(payload.clone())
        .map_err(|e| CoreError::Validation(format!("malformed payload: {e}")))?;
    request.validate()?;
    serde_json::to_value(analyze(&request)).map_err(|e| CoreError::Internal(e.to_string()))
}
