//! Dispatch-bus contract: the assignment envelope consumed from ingress and
//! the publish-once guard for results flowing back.

use std::sync::Arc;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::convert;
use crate::core::{StepRequest, StepResult};
use crate::error::WorkerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "type")]
    pub job_type: String,
    /// Opaque job fields, preserved for echoing.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One assignment from the dispatch bus. Fields beyond the contracted set
/// are carried opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecAssignment {
    pub assignment_id: String,
    pub request_id: String,
    pub provider_id: String,
    pub job: JobSpec,
    pub step: StepRequest,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecAssignment {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Build the `ExecResult` envelope for this assignment's terminal result.
    pub fn exec_result(&self, result: &StepResult) -> Result<Value, WorkerError> {
        convert::to_exec_result(
            result,
            &self.assignment_id,
            &self.request_id,
            &self.provider_id,
            &self.job.job_type,
        )
    }
}

/// Destination for serialized `ExecResult` envelopes.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, payload: Value);
}

/// Writes one envelope per line to stdout (the bus adapter tails it).
pub struct StdoutSink;

impl ResultSink for StdoutSink {
    fn deliver(&self, payload: Value) {
        use std::io::Write;
        let stdout = std::io::stdout();
        let _ = writeln!(stdout.lock(), "{payload}");
    }
}

/// In-memory sink, used by tests and the dry-run path.
#[derive(Default)]
pub struct MemorySink {
    entries: parking_lot::Mutex<Vec<Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn drain(&self) -> Vec<Value> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ResultSink for MemorySink {
    fn deliver(&self, payload: Value) {
        self.entries.lock().push(payload);
    }
}

/// Publishes each step's terminal result at most once. A cancel racing a
/// completion produces two candidate terminal events; the first writer wins
/// and the second is suppressed.
pub struct ResultPublisher {
    sink: Arc<dyn ResultSink>,
    published: DashSet<String>,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        ResultPublisher {
            sink,
            published: DashSet::new(),
        }
    }

    /// Deliver a terminal result. Returns false when a result for this
    /// `step_id` was already published (the payload is dropped).
    pub fn publish(&self, step_id: &str, payload: Value) -> bool {
        if !step_id.is_empty() && !self.published.insert(step_id.to_string()) {
            return false;
        }
        self.sink.deliver(payload);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_roundtrip_preserves_opaque_fields() {
        let raw = r#"{
            "assignment_id": "a1",
            "request_id": "req1",
            "provider_id": "p1",
            "priority": "high",
            "job": { "type": "http.request", "queue": "default" },
            "step": {
                "type": "http.request",
                "inputs": { "url": "https://example.com", "method": "GET" },
                "context": { "tenant_id": "t1", "step_id": "s1" }
            }
        }"#;
        let assignment = ExecAssignment::from_json(raw).unwrap();
        assert_eq!(assignment.assignment_id, "a1");
        assert_eq!(assignment.job.job_type, "http.request");
        assert_eq!(assignment.job.extra["queue"], "default");
        assert_eq!(assignment.extra["priority"], "high");
        assert_eq!(assignment.step.context.tenant_id, "t1");
        assert_eq!(assignment.step.timeout_ms, 30_000);
    }

    #[test]
    fn test_exec_result_echoes_ids() {
        let raw = r#"{
            "assignment_id": "a1",
            "request_id": "req1",
            "provider_id": "p1",
            "job": { "type": "sql.query" },
            "step": { "type": "sql.query" }
        }"#;
        let assignment = ExecAssignment::from_json(raw).unwrap();
        let result = StepResult::success(Default::default(), Default::default(), 3);
        let wire = assignment.exec_result(&result).unwrap();
        assert_eq!(wire["assignment_id"], "a1");
        assert_eq!(wire["request_id"], "req1");
        assert_eq!(wire["job"]["type"], "sql.query");
    }

    #[test]
    fn test_publish_once_per_step() {
        let sink = Arc::new(MemorySink::new());
        let publisher = ResultPublisher::new(sink.clone());
        assert!(publisher.publish("s1", json!({"status": "cancelled"})));
        assert!(!publisher.publish("s1", json!({"status": "success"})));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.drain()[0]["status"], "cancelled");
    }

    #[test]
    fn test_publish_distinct_steps() {
        let sink = Arc::new(MemorySink::new());
        let publisher = ResultPublisher::new(sink.clone());
        assert!(publisher.publish("s1", json!({})));
        assert!(publisher.publish("s2", json!({})));
        assert_eq!(sink.len(), 2);
    }
}
