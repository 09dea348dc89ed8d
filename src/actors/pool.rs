//! Pool actor: per-resource-class admission control. Maintains the
//! concurrency limit, the FIFO pending queue (bounded when queue management
//! is on), and the queue-depth/active-task gauges.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::actors::executor::ExecutorHandle;
use crate::config::FeatureFlags;
use crate::core::{ResourceClass, ResultMetadata, StepRequest, StepResult};
use crate::error::ErrorCode;
use crate::observability::{Correlation, Observability};

pub enum PoolMsg {
    Execute {
        req: StepRequest,
        reply: oneshot::Sender<StepResult>,
    },
    Cancel {
        step_id: String,
    },
    Completed {
        step_id: String,
    },
    Snapshot {
        reply: oneshot::Sender<PoolSnapshot>,
    },
}

/// Point-in-time pool state, for metrics queries and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub queue_depth: usize,
    pub active_tasks: usize,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub resource_class: ResourceClass,
    pub max_concurrency: usize,
    pub max_queue_size: usize,
}

#[derive(Clone)]
pub struct PoolHandle {
    tx: mpsc::Sender<PoolMsg>,
}

impl PoolHandle {
    /// Submit a step; the terminal result arrives on `reply` exactly once.
    pub async fn submit(
        &self,
        req: StepRequest,
        reply: oneshot::Sender<StepResult>,
    ) -> Result<(), StepResult> {
        let metadata = ResultMetadata::from_context(&req.context);
        self.tx
            .send(PoolMsg::Execute { req, reply })
            .await
            .map_err(|_| {
                StepResult::error(
                    ErrorCode::InternalError,
                    "Pool actor is not running",
                    metadata,
                    0,
                )
            })
    }

    pub async fn cancel(&self, step_id: &str) {
        let _ = self
            .tx
            .send(PoolMsg::Cancel {
                step_id: step_id.to_string(),
            })
            .await;
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(PoolMsg::Snapshot { reply: tx }).await.is_err() {
            return PoolSnapshot {
                queue_depth: 0,
                active_tasks: 0,
            };
        }
        rx.await.unwrap_or(PoolSnapshot {
            queue_depth: 0,
            active_tasks: 0,
        })
    }
}

struct PoolState {
    config: PoolConfig,
    flags: FeatureFlags,
    executors: Arc<HashMap<String, ExecutorHandle>>,
    obs: Arc<Observability>,
    self_tx: mpsc::Sender<PoolMsg>,
    current_load: usize,
    pending: VecDeque<(StepRequest, oneshot::Sender<StepResult>)>,
    /// In-flight step ids mapped to their block type, for cancel forwarding.
    active: HashMap<String, String>,
}

impl PoolState {
    fn update_gauges(&self) {
        self.obs
            .metrics
            .set_queue_depth(self.config.resource_class, self.pending.len() as i64);
        self.obs
            .metrics
            .set_active_tasks(self.config.resource_class, self.current_load as i64);
    }

    fn dispatch(&mut self, req: StepRequest, reply: oneshot::Sender<StepResult>) {
        let Some(executor) = self.executors.get(&req.block_type).cloned() else {
            let metadata = ResultMetadata::from_context(&req.context);
            let _ = reply.send(StepResult::error(
                ErrorCode::InvalidInput,
                format!("No executor registered for block type: {}", req.block_type),
                metadata,
                0,
            ));
            return;
        };

        self.current_load += 1;
        let step_id = req.context.step_id.clone();
        if !step_id.is_empty() {
            self.active.insert(step_id.clone(), req.block_type.clone());
        }
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = executor.execute(req).await;
            let _ = reply.send(result);
            let _ = self_tx.send(PoolMsg::Completed { step_id }).await;
        });
    }

    fn process_pending(&mut self) {
        while self.current_load < self.config.max_concurrency {
            let Some((req, reply)) = self.pending.pop_front() else {
                break;
            };
            self.dispatch(req, reply);
        }
    }

    fn handle_execute(&mut self, req: StepRequest, reply: oneshot::Sender<StepResult>) {
        if self.current_load < self.config.max_concurrency {
            self.dispatch(req, reply);
            self.process_pending();
        } else if self.flags.queue_management && self.pending.len() >= self.config.max_queue_size {
            self.obs.logger.warn(
                "Queue full - rejecting request",
                &Correlation::from(&req.context),
                json!({
                    "resource_class": self.config.resource_class.as_str(),
                    "queue_depth": self.pending.len(),
                    "max_queue_size": self.config.max_queue_size,
                    "reason": "queue_full",
                }),
            );
            let metadata = ResultMetadata::from_context(&req.context);
            let _ = reply.send(StepResult::error(
                ErrorCode::SystemOverload,
                format!(
                    "{} pool queue is full ({} pending)",
                    self.config.resource_class,
                    self.pending.len()
                ),
                metadata,
                0,
            ));
        } else {
            self.pending.push_back((req, reply));
        }
        self.update_gauges();
    }

    fn handle_cancel(&mut self, step_id: &str) {
        // Queued requests terminate right here; the reply channel enforces
        // at-most-once publication per request.
        let mut kept = VecDeque::with_capacity(self.pending.len());
        let mut removed = 0usize;
        while let Some((req, reply)) = self.pending.pop_front() {
            if req.context.step_id == step_id {
                let metadata = ResultMetadata::from_context(&req.context);
                let _ = reply.send(StepResult::cancelled(metadata, 0));
                removed += 1;
            } else {
                kept.push_back((req, reply));
            }
        }
        self.pending = kept;

        if removed > 0 {
            let corr = Correlation {
                step_id: step_id.to_string(),
                ..Correlation::default()
            };
            self.obs.logger.info(
                "Step removed from queue",
                &corr,
                json!({
                    "resource_class": self.config.resource_class.as_str(),
                    "removed": removed,
                }),
            );
        }

        if let Some(block_type) = self.active.get(step_id) {
            if let Some(executor) = self.executors.get(block_type).cloned() {
                let step_id = step_id.to_string();
                tokio::spawn(async move {
                    executor.cancel(&step_id).await;
                });
            }
        }
        self.update_gauges();
    }

    fn handle_completed(&mut self, step_id: &str) {
        self.current_load = self.current_load.saturating_sub(1);
        if !step_id.is_empty() {
            self.active.remove(step_id);
        }
        self.process_pending();
        self.update_gauges();
    }
}

/// Spawn one pool actor and return its handle.
pub fn spawn_pool_actor(
    config: PoolConfig,
    executors: Arc<HashMap<String, ExecutorHandle>>,
    flags: FeatureFlags,
    obs: Arc<Observability>,
) -> PoolHandle {
    let (tx, mut rx) = mpsc::channel::<PoolMsg>(256);
    let mut state = PoolState {
        config,
        flags,
        executors,
        obs,
        self_tx: tx.clone(),
        current_load: 0,
        pending: VecDeque::new(),
        active: HashMap::new(),
    };

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                PoolMsg::Execute { req, reply } => state.handle_execute(req, reply),
                PoolMsg::Cancel { step_id } => state.handle_cancel(&step_id),
                PoolMsg::Completed { step_id } => state.handle_completed(&step_id),
                PoolMsg::Snapshot { reply } => {
                    let _ = reply.send(PoolSnapshot {
                        queue_depth: state.pending.len(),
                        active_tasks: state.current_load,
                    });
                }
            }
        }
    });

    PoolHandle { tx }
}
