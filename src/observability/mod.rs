//! Observability facade: structured logging, metrics, and the HTTP
//! endpoints that expose them.

pub mod endpoints;
pub mod log;
pub mod metrics;

use std::sync::Arc;

pub use log::{Correlation, JsonLogger, LogLevel};
pub use metrics::WorkerMetrics;

use crate::config::FeatureFlags;

pub struct Observability {
    pub logger: JsonLogger,
    pub metrics: Arc<WorkerMetrics>,
}

impl Observability {
    pub fn new(worker_id: impl Into<String>, flags: &FeatureFlags) -> Self {
        Observability {
            logger: JsonLogger::new(worker_id),
            metrics: Arc::new(WorkerMetrics::new(flags.observability_metrics)),
        }
    }
}
