//! Worker actor and the public runtime handle.
//!
//! The worker routes each step to the pool matching its resource class,
//! applies sandbox validation and tenant quota checks up front, fans
//! cancellations out to every pool, and keeps the per-tenant usage ledger.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::actors::executor::{spawn_executor_actor, ExecutorHandle};
use crate::actors::pool::{spawn_pool_actor, PoolConfig, PoolHandle};
use crate::config::{FeatureFlags, WorkerConfig};
use crate::core::{
    BlockContext, BlockMetrics, ResourceClass, ResultMetadata, StepRequest, StepResult,
};
use crate::error::{ErrorCode, WorkerError};
use crate::executors::ExecutorRegistry;
use crate::observability::{Correlation, Observability};
use crate::sandbox;
use crate::scheduler::Scheduler;

pub enum WorkerMsg {
    Execute {
        req: StepRequest,
        reply: oneshot::Sender<StepResult>,
    },
    Cancel {
        step_id: String,
    },
    UpdateContext {
        ctx: BlockContext,
    },
    Metrics {
        reply: oneshot::Sender<HashMap<String, BlockMetrics>>,
    },
    RecordUsage {
        tenant_id: String,
        cpu_time_ms: i64,
        mem_bytes: i64,
    },
}

struct WorkerState {
    pools: HashMap<ResourceClass, PoolHandle>,
    executors: Arc<HashMap<String, ExecutorHandle>>,
    scheduler: Scheduler,
    obs: Arc<Observability>,
    sandbox_mode: bool,
    self_tx: mpsc::Sender<WorkerMsg>,
}

impl WorkerState {
    async fn handle_execute(&mut self, req: StepRequest, reply: oneshot::Sender<StepResult>) {
        let metadata = ResultMetadata::from_context(&req.context);
        let corr = Correlation::from(&req.context);

        if self.sandbox_mode || req.context.sandbox {
            if let Err(violation) = sandbox::validate_request(&req) {
                self.obs.logger.warn(
                    "Request rejected by sandbox validation",
                    &corr,
                    json!({ "block_type": req.block_type, "reason": violation.to_string() }),
                );
                let _ = reply.send(StepResult::error(
                    ErrorCode::InvalidInput,
                    violation.to_string(),
                    metadata,
                    0,
                ));
                return;
            }
        }

        if let Err(quota) = self.scheduler.check_quota(&req.context.tenant_id) {
            self.obs.logger.warn(
                "Request rejected by tenant quota",
                &corr,
                json!({ "block_type": req.block_type, "reason": quota.to_string() }),
            );
            let _ = reply.send(StepResult::error(
                ErrorCode::QuotaExceeded,
                quota.to_string(),
                metadata,
                0,
            ));
            return;
        }

        let class = Scheduler::resource_class(&req);
        let Some(pool) = self.pools.get(&class).cloned() else {
            let _ = reply.send(StepResult::error(
                ErrorCode::InternalError,
                format!("No pool for resource class: {class}"),
                metadata,
                0,
            ));
            return;
        };

        let tenant_id = req.context.tenant_id.clone();
        let self_tx = self.self_tx.clone();
        let (tx, rx) = oneshot::channel();
        if let Err(result) = pool.submit(req, tx).await {
            let _ = reply.send(result);
            return;
        }

        // Relay the terminal result and feed the usage ledger without
        // blocking the worker mailbox.
        tokio::spawn(async move {
            match rx.await {
                Ok(result) => {
                    let mem_bytes: i64 = result.outputs.values().map(|v| v.len() as i64).sum();
                    let _ = self_tx
                        .send(WorkerMsg::RecordUsage {
                            tenant_id,
                            cpu_time_ms: result.latency_ms,
                            mem_bytes,
                        })
                        .await;
                    let _ = reply.send(result);
                }
                Err(_) => {
                    let _ = reply.send(StepResult::error(
                        ErrorCode::InternalError,
                        "Pool dropped the request",
                        metadata,
                        0,
                    ));
                }
            }
        });
    }

    async fn handle_cancel(&self, step_id: &str) {
        let corr = Correlation {
            step_id: step_id.to_string(),
            ..Correlation::default()
        };
        self.obs
            .logger
            .info("Step cancellation requested", &corr, json!({}));
        for pool in self.pools.values() {
            pool.cancel(step_id).await;
        }
    }

    fn handle_metrics(&self, reply: oneshot::Sender<HashMap<String, BlockMetrics>>) {
        let executors = self.executors.clone();
        tokio::spawn(async move {
            let mut snapshot = HashMap::new();
            for (block_type, handle) in executors.iter() {
                snapshot.insert(block_type.clone(), handle.metrics().await);
            }
            let _ = reply.send(snapshot);
        });
    }
}

/// Handle to a running worker. Cloneable; drops do not stop the actor tasks
/// until the last handle goes away.
#[derive(Clone)]
pub struct WorkerRuntime {
    tx: mpsc::Sender<WorkerMsg>,
    obs: Arc<Observability>,
}

impl WorkerRuntime {
    pub fn builder() -> WorkerRuntimeBuilder {
        WorkerRuntimeBuilder::default()
    }

    /// Execute one step to its terminal result.
    pub async fn execute(&self, req: StepRequest) -> StepResult {
        let metadata = ResultMetadata::from_context(&req.context);
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(WorkerMsg::Execute { req, reply: tx })
            .await
            .is_err()
        {
            return StepResult::error(
                ErrorCode::InternalError,
                "Worker actor is not running",
                metadata,
                0,
            );
        }
        rx.await.unwrap_or_else(|_| {
            StepResult::error(
                ErrorCode::InternalError,
                "Worker actor dropped the request",
                metadata,
                0,
            )
        })
    }

    /// Fire-and-forget cancellation, broadcast to every pool.
    pub async fn cancel(&self, step_id: &str) {
        let _ = self
            .tx
            .send(WorkerMsg::Cancel {
                step_id: step_id.to_string(),
            })
            .await;
    }

    pub async fn update_context(&self, ctx: BlockContext) {
        let _ = self.tx.send(WorkerMsg::UpdateContext { ctx }).await;
    }

    /// Aggregate metrics snapshots from every executor.
    pub async fn metrics(&self) -> HashMap<String, BlockMetrics> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WorkerMsg::Metrics { reply: tx }).await.is_err() {
            return HashMap::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn observability(&self) -> &Arc<Observability> {
        &self.obs
    }
}

pub struct WorkerRuntimeBuilder {
    config: WorkerConfig,
    flags: FeatureFlags,
    registry: Option<ExecutorRegistry>,
    observability: Option<Arc<Observability>>,
    dry_run: bool,
}

impl Default for WorkerRuntimeBuilder {
    fn default() -> Self {
        WorkerRuntimeBuilder {
            config: WorkerConfig::default(),
            flags: FeatureFlags::default(),
            registry: None,
            observability: None,
            dry_run: false,
        }
    }
}

impl WorkerRuntimeBuilder {
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Replace the built-in executor registry.
    pub fn registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn observability(mut self, obs: Arc<Observability>) -> Self {
        self.observability = Some(obs);
        self
    }

    /// Serve deterministic mock responses instead of real block bodies.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Initialize executors and spawn the actor hierarchy.
    pub async fn spawn(self) -> Result<WorkerRuntime, WorkerError> {
        let flags = self.flags;
        let obs = self.observability.unwrap_or_else(|| {
            Arc::new(Observability::new(format!("worker-{}", Uuid::new_v4()), &flags))
        });

        let registry = match self.registry {
            Some(registry) => registry,
            None if self.dry_run => ExecutorRegistry::with_mocks(),
            None => ExecutorRegistry::with_builtins(&self.config, &flags),
        };

        let init_ctx = BlockContext {
            sandbox: self.config.sandbox_mode,
            ..BlockContext::default()
        };
        for (block_type, executor) in registry.iter() {
            executor.init(&init_ctx).await.map_err(|e| {
                WorkerError::Config(format!("executor init failed for {block_type}: {e}"))
            })?;
        }

        let mut executor_handles = HashMap::new();
        for (block_type, executor) in registry.iter() {
            executor_handles.insert(
                block_type.to_string(),
                spawn_executor_actor(executor.clone(), flags, obs.clone()),
            );
        }
        let executor_handles = Arc::new(executor_handles);

        let mut pools = HashMap::new();
        for class in ResourceClass::all() {
            let max_concurrency = match class {
                ResourceClass::Cpu => self.config.cpu_pool_size,
                ResourceClass::Gpu => self.config.gpu_pool_size,
                ResourceClass::Io => self.config.io_pool_size,
            };
            pools.insert(
                class,
                spawn_pool_actor(
                    PoolConfig {
                        resource_class: class,
                        max_concurrency,
                        max_queue_size: self.config.max_queue_size,
                    },
                    executor_handles.clone(),
                    flags,
                    obs.clone(),
                ),
            );
        }

        let (tx, mut rx) = mpsc::channel::<WorkerMsg>(256);
        let mut state = WorkerState {
            pools,
            executors: executor_handles,
            scheduler: Scheduler::new(&self.config),
            obs: obs.clone(),
            sandbox_mode: self.config.sandbox_mode,
            self_tx: tx.clone(),
        };

        obs.logger.info(
            "Worker initialized",
            &Correlation::default(),
            json!({
                "cpu_pool_size": self.config.cpu_pool_size,
                "gpu_pool_size": self.config.gpu_pool_size,
                "io_pool_size": self.config.io_pool_size,
                "sandbox_mode": self.config.sandbox_mode,
            }),
        );

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    WorkerMsg::Execute { req, reply } => state.handle_execute(req, reply).await,
                    WorkerMsg::Cancel { step_id } => state.handle_cancel(&step_id).await,
                    WorkerMsg::UpdateContext { ctx } => {
                        state.obs.logger.info(
                            "Context updated",
                            &Correlation::from(&ctx),
                            json!({ "sandbox": ctx.sandbox }),
                        );
                    }
                    WorkerMsg::Metrics { reply } => state.handle_metrics(reply),
                    WorkerMsg::RecordUsage {
                        tenant_id,
                        cpu_time_ms,
                        mem_bytes,
                    } => {
                        state
                            .scheduler
                            .record_usage(&tenant_id, cpu_time_ms, mem_bytes);
                    }
                }
            }
        });

        Ok(WorkerRuntime { tx, obs })
    }
}
