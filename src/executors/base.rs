//! Shared helpers for block executor implementations.

use parking_lot::Mutex;

use crate::core::{BlockMetrics, ResultMetadata, StepRequest, StepResult};
use crate::error::ErrorCode;

/// Accumulated execution metrics, safe for concurrent attempts.
#[derive(Default)]
pub struct ExecutionStats {
    inner: Mutex<BlockMetrics>,
}

impl ExecutionStats {
    pub fn new() -> Self {
        ExecutionStats::default()
    }

    pub fn record_success(&self, latency_ms: i64, cpu_time_ms: i64, mem_bytes: i64) {
        let mut metrics = self.inner.lock();
        metrics.latency_ms = latency_ms;
        metrics.cpu_time_ms = cpu_time_ms;
        metrics.mem_bytes = mem_bytes;
        metrics.success_count += 1;
    }

    pub fn record_error(&self, latency_ms: i64) {
        let mut metrics = self.inner.lock();
        metrics.latency_ms = latency_ms;
        metrics.error_count += 1;
    }

    pub fn snapshot(&self) -> BlockMetrics {
        *self.inner.lock()
    }
}

/// Check that every required input is present. Returns the ready-made
/// `missing_required_field` result when one is absent, so executors validate
/// before performing any side effect.
pub fn require_inputs(
    req: &StepRequest,
    metadata: &ResultMetadata,
    required: &[&str],
) -> Result<(), StepResult> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| !req.inputs.contains_key(*key))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(StepResult::error(
        ErrorCode::MissingRequiredField,
        format!("Missing required inputs: {}", missing.join(", ")),
        metadata.clone(),
        0,
    ))
}
