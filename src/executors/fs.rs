//! `fs.blob_put` / `fs.blob_get` block executors.
//!
//! Both refuse paths outside the configured prefix allow-list before
//! touching the filesystem.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::core::{
    BlockContext, BlockMetrics, FsOp, ResourceClass, ResultMetadata, StepRequest, StepResult,
    TimeoutPolicy,
};
use crate::error::ErrorCode;
use crate::executors::base::{require_inputs, ExecutionStats};
use crate::executors::BlockExecutor;

fn path_allowed(path: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix))
}

fn io_error_code(e: &std::io::Error) -> ErrorCode {
    match e.kind() {
        ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
        ErrorKind::NotFound => ErrorCode::ResourceUnavailable,
        _ => ErrorCode::ExecutionFailed,
    }
}

fn epoch_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Deadline for one FS attempt: the per-op deadline when complete timeouts
/// are on, otherwise the request timeout.
fn attempt_deadline(timeouts: &TimeoutPolicy, op: FsOp, req: &StepRequest) -> Duration {
    timeouts
        .fs_deadline(op)
        .unwrap_or_else(|| Duration::from_millis(req.timeout_ms.max(0) as u64))
}

pub struct FsBlobPutExecutor {
    allowed_prefixes: Arc<Vec<String>>,
    timeouts: TimeoutPolicy,
    stats: ExecutionStats,
}

impl FsBlobPutExecutor {
    pub fn new(allowed_prefixes: Arc<Vec<String>>, timeouts: TimeoutPolicy) -> Self {
        FsBlobPutExecutor {
            allowed_prefixes,
            timeouts,
            stats: ExecutionStats::new(),
        }
    }
}

#[async_trait]
impl BlockExecutor for FsBlobPutExecutor {
    fn block_type(&self) -> &str {
        "fs.blob_put"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Io
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let start = Instant::now();
        let metadata = ResultMetadata::from_context(ctx);

        if let Err(result) = require_inputs(req, &metadata, &["path", "content"]) {
            self.stats.record_error(0);
            return result;
        }

        let path = req.input_or("path", "").to_string();
        let content = req.input_or("content", "").to_string();
        let overwrite = req.input_or("overwrite", "") == "true";

        if !path_allowed(&path, &self.allowed_prefixes) {
            let latency_ms = start.elapsed().as_millis() as i64;
            self.stats.record_error(latency_ms);
            return StepResult::error(
                ErrorCode::PermissionDenied,
                format!("Path not allowed: {path}"),
                metadata,
                latency_ms,
            );
        }

        let deadline = attempt_deadline(&self.timeouts, FsOp::Write, req);
        let size = content.len();
        let write = async {
            if !overwrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("File already exists and overwrite is false: {path}"),
                ));
            }
            if let Some(parent) = Path::new(&path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content.as_bytes()).await
        };

        let outcome = tokio::time::timeout(deadline, write).await;
        let latency_ms = start.elapsed().as_millis() as i64;
        match outcome {
            Err(_) => {
                self.stats.record_error(latency_ms);
                let mut result = StepResult::timeout(metadata, latency_ms);
                result.error_message =
                    format!("FS write exceeded {}ms deadline", deadline.as_millis());
                result
            }
            Ok(Err(e)) => {
                self.stats.record_error(latency_ms);
                StepResult::error(
                    io_error_code(&e),
                    format!("File write error: {e}"),
                    metadata,
                    latency_ms,
                )
            }
            Ok(Ok(())) => {
                let mut outputs = HashMap::new();
                outputs.insert("path".into(), path);
                outputs.insert("size".into(), size.to_string());
                outputs.insert("created".into(), epoch_millis(SystemTime::now()).to_string());
                self.stats.record_success(latency_ms, 0, size as i64);
                StepResult::success(metadata, outputs, latency_ms)
            }
        }
    }

    fn metrics(&self) -> BlockMetrics {
        self.stats.snapshot()
    }
}

pub struct FsBlobGetExecutor {
    allowed_prefixes: Arc<Vec<String>>,
    timeouts: TimeoutPolicy,
    stats: ExecutionStats,
}

impl FsBlobGetExecutor {
    pub fn new(allowed_prefixes: Arc<Vec<String>>, timeouts: TimeoutPolicy) -> Self {
        FsBlobGetExecutor {
            allowed_prefixes,
            timeouts,
            stats: ExecutionStats::new(),
        }
    }
}

#[async_trait]
impl BlockExecutor for FsBlobGetExecutor {
    fn block_type(&self) -> &str {
        "fs.blob_get"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Io
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let start = Instant::now();
        let metadata = ResultMetadata::from_context(ctx);

        if let Err(result) = require_inputs(req, &metadata, &["path"]) {
            self.stats.record_error(0);
            return result;
        }

        let path = req.input_or("path", "").to_string();
        if !path_allowed(&path, &self.allowed_prefixes) {
            let latency_ms = start.elapsed().as_millis() as i64;
            self.stats.record_error(latency_ms);
            return StepResult::error(
                ErrorCode::PermissionDenied,
                format!("Path not allowed: {path}"),
                metadata,
                latency_ms,
            );
        }

        let deadline = attempt_deadline(&self.timeouts, FsOp::Read, req);
        let read = async {
            let content = tokio::fs::read_to_string(&path).await?;
            let modified = tokio::fs::metadata(&path)
                .await
                .and_then(|m| m.modified())
                .map(epoch_millis)
                .unwrap_or(0);
            Ok::<_, std::io::Error>((content, modified))
        };

        let outcome = tokio::time::timeout(deadline, read).await;
        let latency_ms = start.elapsed().as_millis() as i64;
        match outcome {
            Err(_) => {
                self.stats.record_error(latency_ms);
                let mut result = StepResult::timeout(metadata, latency_ms);
                result.error_message =
                    format!("FS read exceeded {}ms deadline", deadline.as_millis());
                result
            }
            Ok(Err(e)) => {
                self.stats.record_error(latency_ms);
                StepResult::error(
                    io_error_code(&e),
                    format!("File read error: {e}"),
                    metadata,
                    latency_ms,
                )
            }
            Ok(Ok((content, modified))) => {
                let size = content.len();
                let mut outputs = HashMap::new();
                outputs.insert("path".into(), path);
                outputs.insert("content".into(), content);
                outputs.insert("size".into(), size.to_string());
                outputs.insert("modified".into(), modified.to_string());
                self.stats.record_success(latency_ms, 0, size as i64);
                StepResult::success(metadata, outputs, latency_ms)
            }
        }
    }

    fn metrics(&self) -> BlockMetrics {
        self.stats.snapshot()
    }
}
