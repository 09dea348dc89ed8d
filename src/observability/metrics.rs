//! Prometheus metric families for step executions and pool state.
//!
//! All recording is inert unless the observability-metrics flag is on;
//! correlation labels mirror the result metadata and stay empty when the
//! originating context had no value (cardinality control).

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::core::{ResourceClass, ResultMetadata, StepResult, StepStatus};

const STEP_LABELS: &[&str] = &[
    "step_type",
    "execution_status",
    "tenant_id",
    "run_id",
    "flow_id",
    "step_id",
];

const ERROR_LABELS: &[&str] = &[
    "step_type",
    "error_code",
    "tenant_id",
    "run_id",
    "flow_id",
    "step_id",
];

pub struct WorkerMetrics {
    enabled: bool,
    registry: Registry,
    step_executions_total: IntCounterVec,
    step_execution_duration_seconds: HistogramVec,
    step_errors_total: IntCounterVec,
    queue_depth: IntGaugeVec,
    active_tasks: IntGaugeVec,
    health_status: IntGaugeVec,
}

impl WorkerMetrics {
    pub fn new(enabled: bool) -> Self {
        let registry = Registry::new();

        let step_executions_total = IntCounterVec::new(
            Opts::new(
                "worker_step_executions_total",
                "Total number of step executions",
            ),
            STEP_LABELS,
        )
        .expect("step_executions_total opts");
        let step_execution_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "worker_step_execution_duration_seconds",
                "Step execution duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
            STEP_LABELS,
        )
        .expect("step_execution_duration opts");
        let step_errors_total = IntCounterVec::new(
            Opts::new("worker_step_errors_total", "Total number of step errors"),
            ERROR_LABELS,
        )
        .expect("step_errors_total opts");
        let queue_depth = IntGaugeVec::new(
            Opts::new("worker_queue_depth", "Current pool queue depth"),
            &["resource_pool"],
        )
        .expect("queue_depth opts");
        let active_tasks = IntGaugeVec::new(
            Opts::new("worker_active_tasks", "Current number of active tasks"),
            &["resource_pool"],
        )
        .expect("active_tasks opts");
        let health_status = IntGaugeVec::new(
            Opts::new(
                "worker_health_status",
                "Health status (1 = healthy, 0 = unhealthy)",
            ),
            &["check"],
        )
        .expect("health_status opts");

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(step_executions_total.clone()),
            Box::new(step_execution_duration_seconds.clone()),
            Box::new(step_errors_total.clone()),
            Box::new(queue_depth.clone()),
            Box::new(active_tasks.clone()),
            Box::new(health_status.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric registration conflict");
        }

        WorkerMetrics {
            enabled,
            registry,
            step_executions_total,
            step_execution_duration_seconds,
            step_errors_total,
            queue_depth,
            active_tasks,
            health_status,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn step_labels<'a>(
        step_type: &'a str,
        status: &'a str,
        meta: &'a ResultMetadata,
    ) -> [&'a str; 6] {
        [
            step_type,
            status,
            meta.tenant_id.as_str(),
            meta.run_id.as_str(),
            meta.flow_id.as_str(),
            meta.step_id.as_str(),
        ]
    }

    /// Record one attempt outcome: execution counter, duration histogram,
    /// and the error counter when the attempt failed.
    pub fn record_attempt(&self, step_type: &str, result: &StepResult) {
        if !self.enabled {
            return;
        }
        let status = crate::core::convert::status_to_wire(result.status);
        let labels = Self::step_labels(step_type, status, &result.metadata);
        self.step_executions_total.with_label_values(&labels).inc();
        self.step_execution_duration_seconds
            .with_label_values(&labels)
            .observe(result.latency_ms.max(0) as f64 / 1000.0);

        if result.status == StepStatus::Error {
            let code = result.error_code.as_wire_str();
            let labels = [
                step_type,
                code,
                result.metadata.tenant_id.as_str(),
                result.metadata.run_id.as_str(),
                result.metadata.flow_id.as_str(),
                result.metadata.step_id.as_str(),
            ];
            self.step_errors_total.with_label_values(&labels).inc();
        }
    }

    pub fn set_queue_depth(&self, pool: ResourceClass, depth: i64) {
        if !self.enabled {
            return;
        }
        self.queue_depth
            .with_label_values(&[pool.as_str()])
            .set(depth);
    }

    pub fn set_active_tasks(&self, pool: ResourceClass, count: i64) {
        if !self.enabled {
            return;
        }
        self.active_tasks
            .with_label_values(&[pool.as_str()])
            .set(count);
    }

    pub fn set_health_status(&self, check: &str, healthy: bool) {
        if !self.enabled {
            return;
        }
        self.health_status
            .with_label_values(&[check])
            .set(i64::from(healthy));
    }

    pub fn queue_depth(&self, pool: ResourceClass) -> i64 {
        self.queue_depth.with_label_values(&[pool.as_str()]).get()
    }

    pub fn active_tasks(&self, pool: ResourceClass) -> i64 {
        self.active_tasks.with_label_values(&[pool.as_str()]).get()
    }

    /// Prometheus text exposition of the whole registry.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
