//! `human.approval` block executor. Control-plane block: outside sandbox
//! mode it submits an approval request and reports it pending; in sandbox
//! mode the approval is granted immediately.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::{
    BlockContext, BlockMetrics, ResourceClass, ResultMetadata, StepRequest, StepResult,
};
use crate::error::ErrorCode;
use crate::executors::base::{require_inputs, ExecutionStats};
use crate::executors::BlockExecutor;

pub struct HumanApprovalExecutor {
    stats: ExecutionStats,
}

impl HumanApprovalExecutor {
    pub fn new() -> Self {
        HumanApprovalExecutor {
            stats: ExecutionStats::new(),
        }
    }
}

impl Default for HumanApprovalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockExecutor for HumanApprovalExecutor {
    fn block_type(&self) -> &str {
        "human.approval"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Cpu
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let start = Instant::now();
        let metadata = ResultMetadata::from_context(ctx);

        if let Err(result) = require_inputs(req, &metadata, &["approval_type", "description"]) {
            self.stats.record_error(0);
            return result;
        }

        let timeout_seconds: i64 = match req.input_or("timeout_seconds", "3600").parse() {
            Ok(value) => value,
            Err(_) => {
                let latency_ms = start.elapsed().as_millis() as i64;
                self.stats.record_error(latency_ms);
                return StepResult::error(
                    ErrorCode::InvalidFormat,
                    "timeout_seconds must be an integer",
                    metadata,
                    latency_ms,
                );
            }
        };

        let approval_id = format!("approval-{}", Uuid::new_v4());
        let latency_ms = start.elapsed().as_millis() as i64;
        let mut outputs = HashMap::new();
        outputs.insert("approval_id".into(), approval_id);

        if ctx.sandbox {
            outputs.insert("status".into(), "approved".into());
            outputs.insert("message".into(), "Sandbox approval".into());
            outputs.insert("approved_by".into(), "sandbox_user".into());
            self.stats.record_success(latency_ms, 0, 0);
            return StepResult::success(metadata, outputs, latency_ms);
        }

        outputs.insert("status".into(), "pending".into());
        outputs.insert(
            "message".into(),
            "Approval request submitted. Waiting for human approval.".into(),
        );
        outputs.insert("timeout_seconds".into(), timeout_seconds.to_string());
        self.stats.record_success(latency_ms, 0, 0);
        StepResult::success(metadata, outputs, latency_ms)
    }

    fn metrics(&self) -> BlockMetrics {
        self.stats.snapshot()
    }
}
