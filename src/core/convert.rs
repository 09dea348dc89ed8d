//! Conversion between the canonical [`StepResult`] and the `ExecResult`
//! wire envelope published back to the dispatch bus.

use serde_json::{json, Map, Value};

use crate::core::types::{StepResult, StepStatus};
use crate::error::{ErrorCode, WorkerError};

/// Wire status string for a step status. Total bijection over the enum.
pub fn status_to_wire(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Ok => "success",
        StepStatus::Error => "error",
        StepStatus::Timeout => "timeout",
        StepStatus::Cancelled => "cancelled",
    }
}

/// Decode a wire status. Unknown strings decode to `Error`.
pub fn status_from_wire(status: &str) -> StepStatus {
    match status {
        "success" => StepStatus::Ok,
        "error" => StepStatus::Error,
        "timeout" => StepStatus::Timeout,
        "cancelled" => StepStatus::Cancelled,
        _ => StepStatus::Error,
    }
}

/// Validate the cross-component invariants before a result leaves the worker.
pub fn validate(result: &StepResult) -> Result<(), WorkerError> {
    if result.status == StepStatus::Ok && result.error_code != ErrorCode::None {
        return Err(WorkerError::InvalidResult(
            "ok status with a non-none error code".into(),
        ));
    }
    if result.status != StepStatus::Ok && result.error_code == ErrorCode::None {
        return Err(WorkerError::InvalidResult(format!(
            "{} status without an error code",
            status_to_wire(result.status)
        )));
    }
    if result.status == StepStatus::Ok && !result.error_message.is_empty() {
        return Err(WorkerError::InvalidResult(
            "ok status with an error message".into(),
        ));
    }
    if result.latency_ms < 0 {
        return Err(WorkerError::InvalidResult("negative latency".into()));
    }
    if result.retries_used < 0 {
        return Err(WorkerError::InvalidResult("negative retries_used".into()));
    }
    Ok(())
}

/// Build the `ExecResult` JSON envelope. The result is validated first; an
/// invariant violation is a worker bug and surfaces as an error here rather
/// than as a malformed message on the bus.
pub fn to_exec_result(
    result: &StepResult,
    assignment_id: &str,
    request_id: &str,
    provider_id: &str,
    job_type: &str,
) -> Result<Value, WorkerError> {
    validate(result)?;

    let mut envelope = Map::new();
    envelope.insert("version".into(), json!("1"));
    envelope.insert("assignment_id".into(), json!(assignment_id));
    envelope.insert("request_id".into(), json!(request_id));
    envelope.insert("status".into(), json!(status_to_wire(result.status)));
    envelope.insert("provider_id".into(), json!(provider_id));
    envelope.insert("job".into(), json!({ "type": job_type }));
    envelope.insert("latency_ms".into(), json!(result.latency_ms.to_string()));
    // Cost accounting is a placeholder on this contract version.
    envelope.insert("cost".into(), json!("0.0"));

    if !result.metadata.trace_id.is_empty() {
        envelope.insert("trace_id".into(), json!(result.metadata.trace_id));
    }
    if !result.metadata.run_id.is_empty() {
        envelope.insert("run_id".into(), json!(result.metadata.run_id));
    }
    if !result.metadata.tenant_id.is_empty() {
        envelope.insert("tenant_id".into(), json!(result.metadata.tenant_id));
    }

    if result.status == StepStatus::Error {
        envelope.insert("error_code".into(), json!(result.error_code.as_wire_str()));
        if !result.error_message.is_empty() {
            envelope.insert("error_message".into(), json!(result.error_message));
        }
    }

    Ok(Value::Object(envelope))
}
