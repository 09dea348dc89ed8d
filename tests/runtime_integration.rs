//! End-to-end scenarios through the full Worker -> Pool -> Executor stack.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use beamline_worker::executors::base::ExecutionStats;
use beamline_worker::observability::Observability;
use beamline_worker::{
    BlockContext, BlockExecutor, BlockMetrics, ErrorCode, ExecutorRegistry, FeatureFlags,
    ResourceClass, ResultMetadata, StepRequest, StepResult, StepStatus, WorkerConfig,
    WorkerRuntime,
};

fn flags() -> FeatureFlags {
    FeatureFlags {
        advanced_retry: true,
        complete_timeout: false,
        queue_management: true,
        observability_metrics: true,
    }
}

fn context(step_id: &str) -> BlockContext {
    BlockContext {
        tenant_id: "t1".into(),
        trace_id: "tr1".into(),
        run_id: "r1".into(),
        flow_id: "f1".into(),
        step_id: step_id.into(),
        sandbox: false,
        rbac_scopes: vec![],
    }
}

fn http_request(step_id: &str, url: String) -> StepRequest {
    let mut req = StepRequest::new("http.request", context(step_id));
    req.inputs.insert("url".into(), url);
    req.inputs.insert("method".into(), "GET".into());
    req
}

async fn default_runtime() -> WorkerRuntime {
    WorkerRuntime::builder()
        .flags(flags())
        .spawn()
        .await
        .expect("runtime")
}

#[tokio::test]
async fn test_success_path_with_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let runtime = default_runtime().await;
    let result = runtime
        .execute(http_request("s1", format!("{}/ok", server.uri())))
        .await;

    assert_eq!(result.status, StepStatus::Ok, "{}", result.error_message);
    assert_eq!(result.error_code, ErrorCode::None);
    assert_eq!(result.outputs["status_code"], "200");
    assert_eq!(result.outputs["body"], "OK");
    assert_eq!(result.retries_used, 0);
    assert_eq!(result.metadata.trace_id, "tr1");
    assert_eq!(result.metadata.run_id, "r1");
    assert_eq!(result.metadata.tenant_id, "t1");
    assert_eq!(result.metadata.flow_id, "f1");
    assert_eq!(result.metadata.step_id, "s1");
}

#[tokio::test]
async fn test_retry_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    let runtime = default_runtime().await;
    let started = Instant::now();
    let result = runtime
        .execute(http_request("s2", format!("{}/flaky", server.uri())))
        .await;

    assert_eq!(result.status, StepStatus::Ok, "{}", result.error_message);
    assert_eq!(result.retries_used, 2);
    assert_eq!(result.outputs["body"], "recovered");
    // Two backoffs at defaults: 100ms + 200ms.
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_4xx_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = default_runtime().await;
    let result = runtime
        .execute(http_request("s3", format!("{}/missing", server.uri())))
        .await;

    assert_eq!(result.status, StepStatus::Error);
    assert_eq!(result.error_code, ErrorCode::HttpError);
    assert_eq!(result.outputs["status_code"], "404");
    assert_eq!(result.retries_used, 0);
}

#[tokio::test]
async fn test_validation_error_single_attempt() {
    let runtime = default_runtime().await;
    let mut req = StepRequest::new("fs.blob_put", context("s4"));
    req.inputs.insert("path".into(), "/tmp/beamline/x".into());
    // `content` deliberately missing.
    let result = runtime.execute(req).await;

    assert_eq!(result.status, StepStatus::Error);
    assert_eq!(result.error_code, ErrorCode::MissingRequiredField);
    assert_eq!(result.retries_used, 0);
}

#[tokio::test]
async fn test_timeout_budget_exhaustion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;

    let runtime = default_runtime().await;
    let mut req = http_request("s5", format!("{}/slow", server.uri()));
    req.timeout_ms = 250;
    req.retry_count = 5;

    let started = Instant::now();
    let result = runtime.execute(req).await;

    assert_eq!(result.status, StepStatus::Timeout);
    assert_eq!(result.error_code, ErrorCode::CancelledByTimeout);
    assert!(result.retries_used <= 2, "retries: {}", result.retries_used);
    assert!(started.elapsed() <= Duration::from_millis(600));
}

#[tokio::test]
async fn test_unknown_block_type() {
    let runtime = default_runtime().await;
    let result = runtime
        .execute(StepRequest::new("no.such_block", context("s6")))
        .await;
    assert_eq!(result.error_code, ErrorCode::InvalidInput);
    assert!(result.error_message.contains("no.such_block"));
}

#[tokio::test]
async fn test_sandbox_rejects_destructive_sql() {
    let runtime = default_runtime().await;
    let ctx = BlockContext {
        sandbox: true,
        ..context("s7")
    };
    let mut req = StepRequest::new("sql.query", ctx);
    req.inputs.insert("query".into(), "DROP TABLE x".into());
    let result = runtime.execute(req).await;

    assert_eq!(result.status, StepStatus::Error);
    assert_eq!(result.error_code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_dry_run_serves_mock_responses() {
    let runtime = WorkerRuntime::builder()
        .flags(flags())
        .dry_run(true)
        .spawn()
        .await
        .expect("runtime");
    let result = runtime
        .execute(http_request("s8", "https://unreachable.invalid/".into()))
        .await;
    assert_eq!(result.status, StepStatus::Ok);
    assert_eq!(result.outputs["status_code"], "200");
}

/// Executor that signals when an attempt starts and blocks until released.
struct GateExecutor {
    started_tx: mpsc::UnboundedSender<String>,
    release: Arc<Semaphore>,
    stats: ExecutionStats,
}

#[async_trait]
impl BlockExecutor for GateExecutor {
    fn block_type(&self) -> &str {
        "test.gate"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Cpu
    }

    async fn execute(&self, _req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let _ = self.started_tx.send(ctx.step_id.clone());
        let metadata = ResultMetadata::from_context(ctx);
        match self.release.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => {
                return StepResult::error(ErrorCode::InternalError, "gate closed", metadata, 0)
            }
        }
        self.stats.record_success(1, 0, 0);
        let mut outputs = HashMap::new();
        outputs.insert("done".into(), "true".into());
        StepResult::success(metadata, outputs, 1)
    }

    fn metrics(&self) -> BlockMetrics {
        self.stats.snapshot()
    }
}

struct GatedRuntime {
    runtime: WorkerRuntime,
    obs: Arc<Observability>,
    started_rx: mpsc::UnboundedReceiver<String>,
    release: Arc<Semaphore>,
}

async fn gated_runtime(max_queue_size: usize) -> GatedRuntime {
    let (started_tx, started_rx) = mpsc::unbounded_channel();
    let release = Arc::new(Semaphore::new(0));
    let mut registry = ExecutorRegistry::empty();
    registry.register(Arc::new(GateExecutor {
        started_tx,
        release: release.clone(),
        stats: ExecutionStats::new(),
    }));

    let obs = Arc::new(Observability::new("gate-test", &flags()));
    let config = WorkerConfig {
        cpu_pool_size: 1,
        max_queue_size,
        ..WorkerConfig::default()
    };
    let runtime = WorkerRuntime::builder()
        .config(config)
        .flags(flags())
        .registry(registry)
        .observability(obs.clone())
        .spawn()
        .await
        .expect("runtime");
    GatedRuntime {
        runtime,
        obs,
        started_rx,
        release,
    }
}

fn gate_request(step_id: &str) -> StepRequest {
    let mut req = StepRequest::new("test.gate", context(step_id));
    req.retry_count = 0;
    req
}

async fn wait_for_queue_depth(obs: &Observability, depth: i64) {
    for _ in 0..200 {
        if obs.metrics.queue_depth(ResourceClass::Cpu) == depth {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "queue depth never reached {depth}, is {}",
        obs.metrics.queue_depth(ResourceClass::Cpu)
    );
}

#[tokio::test]
async fn test_bounded_queue_rejection() {
    let mut gated = gated_runtime(2).await;

    // First request occupies the single slot.
    let first = tokio::spawn({
        let runtime = gated.runtime.clone();
        async move { runtime.execute(gate_request("q1")).await }
    });
    let started = gated.started_rx.recv().await.expect("first start");
    assert_eq!(started, "q1");

    // Two more fill the queue.
    let second = tokio::spawn({
        let runtime = gated.runtime.clone();
        async move { runtime.execute(gate_request("q2")).await }
    });
    let third = tokio::spawn({
        let runtime = gated.runtime.clone();
        async move { runtime.execute(gate_request("q3")).await }
    });
    wait_for_queue_depth(&gated.obs, 2).await;

    // Fourth is rejected while the queue-depth gauge reads 2.
    let rejected = gated.runtime.execute(gate_request("q4")).await;
    assert_eq!(rejected.status, StepStatus::Error);
    assert_eq!(rejected.error_code, ErrorCode::SystemOverload);
    assert_eq!(gated.obs.metrics.queue_depth(ResourceClass::Cpu), 2);

    gated.release.add_permits(8);
    for handle in [first, second, third] {
        let result = handle.await.unwrap();
        assert_eq!(result.status, StepStatus::Ok, "{}", result.error_message);
    }
}

#[tokio::test]
async fn test_cancel_in_queue() {
    let mut gated = gated_runtime(10).await;

    let a = tokio::spawn({
        let runtime = gated.runtime.clone();
        async move { runtime.execute(gate_request("step-a")).await }
    });
    assert_eq!(gated.started_rx.recv().await.expect("start"), "step-a");

    let b = tokio::spawn({
        let runtime = gated.runtime.clone();
        async move { runtime.execute(gate_request("step-b")).await }
    });
    let c = tokio::spawn({
        let runtime = gated.runtime.clone();
        async move { runtime.execute(gate_request("step-c")).await }
    });
    wait_for_queue_depth(&gated.obs, 2).await;

    gated.runtime.cancel("step-b").await;
    let cancelled = b.await.unwrap();
    assert_eq!(cancelled.status, StepStatus::Cancelled);
    assert_eq!(cancelled.error_code, ErrorCode::CancelledByUser);

    gated.release.add_permits(8);
    let a = a.await.unwrap();
    let c = c.await.unwrap();
    assert_eq!(a.status, StepStatus::Ok);
    assert_eq!(c.status, StepStatus::Ok);

    // Only step-c was dispatched after the cancel; step-b never started.
    let mut started = Vec::new();
    while let Ok(step_id) = gated.started_rx.try_recv() {
        started.push(step_id);
    }
    assert_eq!(started, vec!["step-c".to_string()]);
}

#[tokio::test]
async fn test_metrics_snapshot_aggregation() {
    let mut gated = gated_runtime(10).await;
    gated.release.add_permits(1);
    let result = gated.runtime.execute(gate_request("m1")).await;
    assert_eq!(result.status, StepStatus::Ok);
    let _ = gated.started_rx.recv().await;

    let metrics = gated.runtime.metrics().await;
    assert_eq!(metrics["test.gate"].success_count, 1);
}

#[tokio::test]
async fn test_quota_exceeded_rejected_before_enqueue() {
    let config = WorkerConfig {
        max_memory_per_tenant_mb: 0,
        ..WorkerConfig::default()
    };
    let runtime = WorkerRuntime::builder()
        .config(config)
        .flags(flags())
        .dry_run(true)
        .spawn()
        .await
        .expect("runtime");

    // First request lands output bytes on the tenant ledger.
    let mut req = StepRequest::new("sql.query", context("qt1"));
    req.inputs.insert("query".into(), "SELECT 1".into());
    let first = runtime.execute(req.clone()).await;
    assert_eq!(first.status, StepStatus::Ok);

    // Usage is recorded asynchronously after publication; poll until the
    // quota trips for the next request.
    let mut rejected = None;
    for attempt in 0..200 {
        req.context.step_id = format!("qt-{attempt}");
        let result = runtime.execute(req.clone()).await;
        if result.error_code == ErrorCode::QuotaExceeded {
            rejected = Some(result);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let rejected = rejected.expect("quota never tripped");
    assert_eq!(rejected.status, StepStatus::Error);
}
