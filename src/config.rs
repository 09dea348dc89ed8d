//! Worker configuration and environment-derived feature flags.

use serde::{Deserialize, Serialize};

fn default_cpu_pool_size() -> usize {
    4
}
fn default_gpu_pool_size() -> usize {
    1
}
fn default_io_pool_size() -> usize {
    8
}
fn default_max_queue_size() -> usize {
    1000
}
fn default_max_memory_per_tenant_mb() -> i64 {
    1024
}
fn default_max_cpu_time_per_tenant_ms() -> i64 {
    3_600_000
}
fn default_bus_url() -> String {
    "nats://localhost:4222".to_string()
}
fn default_health_port() -> u16 {
    9091
}
fn default_metrics_port() -> u16 {
    9092
}
fn default_fs_allowed_prefixes() -> Vec<String> {
    vec![
        "/tmp/beamline/".to_string(),
        "/var/lib/beamline/data/".to_string(),
        "./data/".to_string(),
    ]
}

/// Static worker configuration. Loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_cpu_pool_size")]
    pub cpu_pool_size: usize,
    #[serde(default = "default_gpu_pool_size")]
    pub gpu_pool_size: usize,
    #[serde(default = "default_io_pool_size")]
    pub io_pool_size: usize,
    /// Bound on each pool's pending queue; enforced only when the
    /// queue-management flag is on.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_max_memory_per_tenant_mb")]
    pub max_memory_per_tenant_mb: i64,
    #[serde(default = "default_max_cpu_time_per_tenant_ms")]
    pub max_cpu_time_per_tenant_ms: i64,
    #[serde(default)]
    pub sandbox_mode: bool,
    #[serde(default = "default_bus_url")]
    pub bus_url: String,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Filesystem executors refuse paths outside these prefixes.
    #[serde(default = "default_fs_allowed_prefixes")]
    pub fs_allowed_prefixes: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            cpu_pool_size: default_cpu_pool_size(),
            gpu_pool_size: default_gpu_pool_size(),
            io_pool_size: default_io_pool_size(),
            max_queue_size: default_max_queue_size(),
            max_memory_per_tenant_mb: default_max_memory_per_tenant_mb(),
            max_cpu_time_per_tenant_ms: default_max_cpu_time_per_tenant_ms(),
            sandbox_mode: false,
            bus_url: default_bus_url(),
            health_port: default_health_port(),
            metrics_port: default_metrics_port(),
            fs_allowed_prefixes: default_fs_allowed_prefixes(),
        }
    }
}

/// Runtime feature gates. Each defaults to off, preserving baseline behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Exponential backoff, error classification, retry budget.
    pub advanced_retry: bool,
    /// Per-operation FS deadlines and split HTTP connect/request timeouts.
    pub complete_timeout: bool,
    /// Bounded pool queues with overload rejection.
    pub queue_management: bool,
    /// Step/flow metrics and the `/metrics` endpoint.
    pub observability_metrics: bool,
}

impl FeatureFlags {
    /// Read all flags from the process environment.
    pub fn from_env() -> Self {
        FeatureFlags {
            advanced_retry: env_bool("ADVANCED_RETRY_ENABLED"),
            complete_timeout: env_bool("COMPLETE_TIMEOUT_ENABLED"),
            queue_management: env_bool("QUEUE_MANAGEMENT_ENABLED"),
            observability_metrics: env_bool("OBSERVABILITY_METRICS_ENABLED"),
        }
    }

}

/// `"true" | "1" | "yes"` (case-insensitive) parse as true; absent or
/// anything else is false.
fn env_bool(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => false,
    }
}
