//! Executor actor: wraps one [`BlockExecutor`] behind a mailbox and drives
//! the retry loop for each step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::FeatureFlags;
use crate::core::{BlockMetrics, ResultMetadata, RetryPolicy, StepRequest, StepResult};
use crate::error::ErrorCode;
use crate::executors::BlockExecutor;
use crate::observability::{Correlation, Observability};

pub enum ExecutorMsg {
    Execute {
        req: StepRequest,
        reply: oneshot::Sender<StepResult>,
    },
    Cancel {
        step_id: String,
    },
    Metrics {
        reply: oneshot::Sender<BlockMetrics>,
    },
}

#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::Sender<ExecutorMsg>,
}

impl ExecutorHandle {
    /// Run one step to completion, including retries. Never fails: a dead
    /// actor surfaces as an internal-error result.
    pub async fn execute(&self, req: StepRequest) -> StepResult {
        let metadata = ResultMetadata::from_context(&req.context);
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(ExecutorMsg::Execute { req, reply: tx })
            .await
            .is_err()
        {
            return StepResult::error(
                ErrorCode::InternalError,
                "Executor actor is not running",
                metadata,
                0,
            );
        }
        rx.await.unwrap_or_else(|_| {
            StepResult::error(
                ErrorCode::InternalError,
                "Executor actor dropped the request",
                metadata,
                0,
            )
        })
    }

    pub async fn cancel(&self, step_id: &str) {
        let _ = self
            .tx
            .send(ExecutorMsg::Cancel {
                step_id: step_id.to_string(),
            })
            .await;
    }

    pub async fn metrics(&self) -> BlockMetrics {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(ExecutorMsg::Metrics { reply: tx })
            .await
            .is_err()
        {
            return BlockMetrics::default();
        }
        rx.await.unwrap_or_default()
    }
}

/// Spawn the actor task for one executor and return its handle.
pub fn spawn_executor_actor(
    executor: Arc<dyn BlockExecutor>,
    flags: FeatureFlags,
    obs: Arc<Observability>,
) -> ExecutorHandle {
    let (tx, mut rx) = mpsc::channel::<ExecutorMsg>(256);
    let running: Arc<DashMap<String, CancellationToken>> = Arc::new(DashMap::new());

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                ExecutorMsg::Execute { req, reply } => {
                    let token = CancellationToken::new();
                    let step_id = req.context.step_id.clone();
                    if !step_id.is_empty() {
                        running.insert(step_id.clone(), token.clone());
                    }
                    let executor = executor.clone();
                    let obs = obs.clone();
                    let running = running.clone();
                    // The attempt loop runs off the mailbox task so cancels
                    // stay deliverable while a step is in flight.
                    tokio::spawn(async move {
                        let result = run_with_retry(&*executor, &req, &flags, &obs, &token).await;
                        if !step_id.is_empty() {
                            running.remove(&step_id);
                        }
                        let corr = Correlation::from(&result.metadata);
                        if result.is_ok() {
                            obs.logger.info(
                                "Step completed",
                                &corr,
                                json!({
                                    "block_type": req.block_type,
                                    "latency_ms": result.latency_ms,
                                    "retries_used": result.retries_used,
                                }),
                            );
                        } else {
                            obs.logger.warn(
                                "Step did not complete",
                                &corr,
                                json!({
                                    "block_type": req.block_type,
                                    "status": crate::core::convert::status_to_wire(result.status),
                                    "error_code": result.error_code.as_wire_str(),
                                    "retries_used": result.retries_used,
                                }),
                            );
                        }
                        let _ = reply.send(result);
                    });
                }
                ExecutorMsg::Cancel { step_id } => {
                    if let Some(entry) = running.get(&step_id) {
                        entry.value().cancel();
                    }
                    if let Err(e) = executor.cancel(&step_id).await {
                        let corr = Correlation {
                            step_id: step_id.clone(),
                            ..Correlation::default()
                        };
                        obs.logger
                            .warn("Step cancel failed", &corr, json!({ "error": e.to_string() }));
                    }
                }
                ExecutorMsg::Metrics { reply } => {
                    let _ = reply.send(executor.metrics());
                }
            }
        }
    });

    ExecutorHandle { tx }
}

/// The retry loop: one attempt per iteration, bounded by the request's
/// retry count and total timeout budget, cooperating with cancellation.
pub(crate) async fn run_with_retry(
    executor: &dyn BlockExecutor,
    req: &StepRequest,
    flags: &FeatureFlags,
    obs: &Observability,
    cancel: &CancellationToken,
) -> StepResult {
    let policy = RetryPolicy::for_request(req.timeout_ms, req.retry_count, flags);
    let started = Instant::now();
    let metadata = ResultMetadata::from_context(&req.context);
    let mut http_status: u16 = 0;
    let mut last_result: Option<StepResult> = None;

    for attempt in 0..=policy.max_retries() {
        let elapsed_ms = started.elapsed().as_millis() as i64;
        if policy.is_budget_exhausted(elapsed_ms, attempt) {
            let mut result = StepResult::timeout(metadata.clone(), elapsed_ms);
            result.error_message = "Retry budget exhausted: total timeout exceeded".into();
            result.retries_used = attempt;
            obs.metrics.record_attempt(&req.block_type, &result);
            return result;
        }

        let attempt_started = Instant::now();
        let mut result = tokio::select! {
            _ = cancel.cancelled() => {
                let mut result = StepResult::cancelled(
                    metadata.clone(),
                    attempt_started.elapsed().as_millis() as i64,
                );
                result.retries_used = attempt;
                obs.metrics.record_attempt(&req.block_type, &result);
                return result;
            }
            result = executor.execute(req, &req.context) => result,
        };
        result.latency_ms = attempt_started.elapsed().as_millis() as i64;
        result.retries_used = attempt;
        obs.metrics.record_attempt(&req.block_type, &result);

        if result.is_ok() {
            return result;
        }

        // Keep the parsed HTTP status alongside the error code so 4xx/5xx
        // classification stays independent of the code.
        if req.block_type == "http.request" {
            if let Some(code) = result.outputs.get("status_code") {
                http_status = code.parse().unwrap_or(0);
            }
        }

        if !policy.is_retryable(result.error_code, http_status) {
            return result;
        }
        last_result = Some(result);

        if attempt < policy.max_retries() {
            let delay_ms = policy.backoff_delay_ms(attempt);
            let elapsed_ms = started.elapsed().as_millis() as i64;
            if elapsed_ms + delay_ms >= policy.total_timeout_ms() {
                let mut result = StepResult::timeout(metadata.clone(), elapsed_ms);
                result.error_message =
                    "Retry budget exhausted: backoff delay would exceed total timeout".into();
                result.retries_used = attempt;
                obs.metrics.record_attempt(&req.block_type, &result);
                return result;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    let mut result = StepResult::cancelled(
                        metadata.clone(),
                        started.elapsed().as_millis() as i64,
                    );
                    result.retries_used = attempt;
                    obs.metrics.record_attempt(&req.block_type, &result);
                    return result;
                }
                _ = tokio::time::sleep(Duration::from_millis(delay_ms.max(0) as u64)) => {}
            }
        }
    }

    match last_result {
        Some(mut result) => {
            result.retries_used = policy.max_retries();
            result
        }
        // Unreachable with retry_count >= 0: every iteration either returns
        // or stores a result.
        None => StepResult::error(
            ErrorCode::InternalError,
            "Retry loop produced no result",
            metadata,
            started.elapsed().as_millis() as i64,
        ),
    }
}
