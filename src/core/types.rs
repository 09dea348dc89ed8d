//! Core data contract: request, context, and result types exchanged between
//! the ingress, the actor tiers, and the block executors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Per-request correlation carrier. Immutable once attached to a request;
/// copied by value into every result's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub flow_id: String,
    #[serde(default)]
    pub step_id: String,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub rbac_scopes: Vec<String>,
}

fn default_timeout_ms() -> i64 {
    30_000
}

fn default_retry_count() -> i32 {
    3
}

/// One unit of work, created by ingress and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    #[serde(default)]
    pub resources: HashMap<String, String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,
    #[serde(default = "default_retry_count")]
    pub retry_count: i32,
    #[serde(default)]
    pub guardrails: HashMap<String, String>,
    #[serde(default)]
    pub context: BlockContext,
}

impl StepRequest {
    pub fn new(block_type: impl Into<String>, context: BlockContext) -> Self {
        StepRequest {
            block_type: block_type.into(),
            inputs: HashMap::new(),
            resources: HashMap::new(),
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            guardrails: HashMap::new(),
            context,
        }
    }

    pub fn input(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).map(String::as_str)
    }

    pub fn input_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.input(key).unwrap_or(default)
    }
}

/// Terminal status of a step, aligned with the `ExecResult` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Maps to "success" on the wire.
    Ok,
    Error,
    Timeout,
    Cancelled,
}

/// Correlation fields copied from the originating [`BlockContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub trace_id: String,
    pub run_id: String,
    pub flow_id: String,
    pub step_id: String,
    pub tenant_id: String,
}

impl ResultMetadata {
    pub fn from_context(ctx: &BlockContext) -> Self {
        ResultMetadata {
            trace_id: ctx.trace_id.clone(),
            run_id: ctx.run_id.clone(),
            flow_id: ctx.flow_id.clone(),
            step_id: ctx.step_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
        }
    }
}

/// Canonical outcome of a step execution. Constructed only through the
/// factory methods so the status/error-code invariants hold on every value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub error_code: ErrorCode,
    pub outputs: HashMap<String, String>,
    pub error_message: String,
    pub metadata: ResultMetadata,
    pub latency_ms: i64,
    pub retries_used: i32,
}

impl StepResult {
    pub fn success(
        metadata: ResultMetadata,
        outputs: HashMap<String, String>,
        latency_ms: i64,
    ) -> Self {
        StepResult {
            status: StepStatus::Ok,
            error_code: ErrorCode::None,
            outputs,
            error_message: String::new(),
            metadata,
            latency_ms,
            retries_used: 0,
        }
    }

    pub fn error(
        code: ErrorCode,
        message: impl Into<String>,
        metadata: ResultMetadata,
        latency_ms: i64,
    ) -> Self {
        StepResult {
            status: StepStatus::Error,
            error_code: code,
            outputs: HashMap::new(),
            error_message: message.into(),
            metadata,
            latency_ms,
            retries_used: 0,
        }
    }

    pub fn timeout(metadata: ResultMetadata, latency_ms: i64) -> Self {
        StepResult {
            status: StepStatus::Timeout,
            error_code: ErrorCode::CancelledByTimeout,
            outputs: HashMap::new(),
            error_message: String::new(),
            metadata,
            latency_ms,
            retries_used: 0,
        }
    }

    pub fn cancelled(metadata: ResultMetadata, latency_ms: i64) -> Self {
        StepResult {
            status: StepStatus::Cancelled,
            error_code: ErrorCode::CancelledByUser,
            outputs: HashMap::new(),
            error_message: String::new(),
            metadata,
            latency_ms,
            retries_used: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}

/// Accumulated per-executor metrics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetrics {
    pub latency_ms: i64,
    pub cpu_time_ms: i64,
    pub mem_bytes: i64,
    pub success_count: i64,
    pub error_count: i64,
}

/// Resource class a step is scheduled onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Cpu,
    Gpu,
    Io,
}

impl ResourceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::Cpu => "cpu",
            ResourceClass::Gpu => "gpu",
            ResourceClass::Io => "io",
        }
    }

    pub fn all() -> [ResourceClass; 3] {
        [ResourceClass::Cpu, ResourceClass::Gpu, ResourceClass::Io]
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BlockContext {
        BlockContext {
            tenant_id: "t1".into(),
            trace_id: "tr1".into(),
            run_id: "r1".into(),
            flow_id: "f1".into(),
            step_id: "s1".into(),
            sandbox: false,
            rbac_scopes: vec![],
        }
    }

    #[test]
    fn test_success_invariants() {
        let result = StepResult::success(ResultMetadata::from_context(&ctx()), HashMap::new(), 5);
        assert_eq!(result.status, StepStatus::Ok);
        assert_eq!(result.error_code, ErrorCode::None);
        assert!(result.error_message.is_empty());
        assert_eq!(result.metadata.trace_id, "tr1");
        assert_eq!(result.metadata.run_id, "r1");
        assert_eq!(result.metadata.tenant_id, "t1");
        assert!(result.latency_ms >= 0);
    }

    #[test]
    fn test_error_carries_code() {
        let result = StepResult::error(
            ErrorCode::NetworkError,
            "connection refused",
            ResultMetadata::from_context(&ctx()),
            12,
        );
        assert_eq!(result.status, StepStatus::Error);
        assert_ne!(result.error_code, ErrorCode::None);
    }

    #[test]
    fn test_timeout_and_cancel_codes() {
        let meta = ResultMetadata::from_context(&ctx());
        assert_eq!(
            StepResult::timeout(meta.clone(), 0).error_code,
            ErrorCode::CancelledByTimeout
        );
        assert_eq!(
            StepResult::cancelled(meta, 0).error_code,
            ErrorCode::CancelledByUser
        );
    }

    #[test]
    fn test_request_defaults() {
        let req: StepRequest = serde_json::from_str(r#"{"type": "http.request"}"#).unwrap();
        assert_eq!(req.timeout_ms, 30_000);
        assert_eq!(req.retry_count, 3);
        assert!(req.inputs.is_empty());
        assert!(!req.context.sandbox);
    }

    #[test]
    fn test_metadata_copies_context() {
        let meta = ResultMetadata::from_context(&ctx());
        assert_eq!(meta.flow_id, "f1");
        assert_eq!(meta.step_id, "s1");
    }
}
