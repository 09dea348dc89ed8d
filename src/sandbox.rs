//! Sandbox safety validation and the deterministic mock runtime used for
//! dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{
    BlockContext, BlockMetrics, ResourceClass, ResultMetadata, StepRequest, StepResult,
};
use crate::executors::base::ExecutionStats;
use crate::executors::BlockExecutor;

const FORBIDDEN_SQL_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "GRANT", "REVOKE",
];

/// A request rejected by sandbox validation. All variants surface to the
/// caller as `invalid_input`.
#[derive(Debug, Error)]
pub enum SandboxViolation {
    #[error("Sandbox mode: system execution blocks not allowed ({0})")]
    SystemBlock(String),
    #[error("Sandbox mode: {0} URLs not allowed")]
    ForbiddenUrlScheme(String),
    #[error("Sandbox mode: destructive SQL operations not allowed")]
    DestructiveSql,
}

/// Validate that a request can be safely executed in sandbox mode. Must run
/// before any side effect.
pub fn validate_request(req: &StepRequest) -> Result<(), SandboxViolation> {
    if req.block_type.starts_with("exec.") || req.block_type.starts_with("system.") {
        return Err(SandboxViolation::SystemBlock(req.block_type.clone()));
    }

    if req.block_type == "http.request" {
        if let Some(url) = req.input("url") {
            for scheme in ["file://", "ftp://"] {
                if url.starts_with(scheme) {
                    return Err(SandboxViolation::ForbiddenUrlScheme(
                        scheme.trim_end_matches("//").to_string(),
                    ));
                }
            }
        }
    }

    if req.block_type == "sql.query" {
        if let Some(query) = req.input("query") {
            let upper = query.to_uppercase();
            if FORBIDDEN_SQL_KEYWORDS
                .iter()
                .any(|keyword| upper.contains(keyword))
            {
                return Err(SandboxViolation::DestructiveSql);
            }
        }
    }

    Ok(())
}

/// Deterministic canned outputs per block type. Repeated dry runs of the
/// same request produce identical results.
pub fn mock_outputs(req: &StepRequest) -> HashMap<String, String> {
    let mut outputs = HashMap::new();
    match req.block_type.as_str() {
        "http.request" => {
            outputs.insert("status_code".into(), "200".into());
            outputs.insert("body".into(), r#"{"message":"Mock HTTP response"}"#.into());
            outputs.insert(
                "headers".into(),
                r#"{"content-type":"application/json","x-mock":"true"}"#.into(),
            );
        }
        "fs.blob_put" => {
            outputs.insert(
                "path".into(),
                req.input_or("path", "/tmp/beamline/mock.txt").into(),
            );
            outputs.insert(
                "size".into(),
                req.input_or("content", "").len().to_string(),
            );
            outputs.insert("created".into(), "0".into());
        }
        "fs.blob_get" => {
            outputs.insert(
                "path".into(),
                req.input_or("path", "/tmp/beamline/mock.txt").into(),
            );
            outputs.insert("content".into(), "Mock file content".into());
            outputs.insert("size".into(), "17".into());
            outputs.insert("modified".into(), "0".into());
        }
        "sql.query" => {
            let query = req.input_or("query", "").to_uppercase();
            if query.contains("SELECT") {
                outputs.insert("rows".into(), r#"[{"id":"1","name":"Mock Item"}]"#.into());
                outputs.insert("row_count".into(), "1".into());
            } else {
                outputs.insert("affected_rows".into(), "1".into());
            }
        }
        "human.approval" => {
            outputs.insert(
                "approval_id".into(),
                format!("mock-approval-{}", req.context.step_id),
            );
            outputs.insert("status".into(), "approved".into());
            outputs.insert("message".into(), "Mock approval".into());
        }
        other => {
            outputs.insert("mock_result".into(), "true".into());
            outputs.insert("block_type".into(), other.into());
        }
    }
    outputs
}

/// Mock executor wrapping the canned responses behind the standard executor
/// seam, so dry runs exercise the same actor path as real executions.
pub struct MockBlockExecutor {
    block_type: String,
    resource_class: ResourceClass,
    stats: ExecutionStats,
}

impl MockBlockExecutor {
    pub fn new(block_type: impl Into<String>, resource_class: ResourceClass) -> Self {
        MockBlockExecutor {
            block_type: block_type.into(),
            resource_class,
            stats: ExecutionStats::new(),
        }
    }
}

#[async_trait]
impl BlockExecutor for MockBlockExecutor {
    fn block_type(&self) -> &str {
        &self.block_type
    }

    fn resource_class(&self) -> ResourceClass {
        self.resource_class
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let metadata = ResultMetadata::from_context(ctx);
        self.stats.record_success(0, 0, 0);
        StepResult::success(metadata, mock_outputs(req), 0)
    }

    fn metrics(&self) -> BlockMetrics {
        self.stats.snapshot()
    }
}
