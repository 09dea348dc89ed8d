//! Resource-class routing and per-tenant quota accounting.
//!
//! The scheduler lives inside the worker actor task, so the usage ledger has
//! a single writer and needs no locking.

use std::collections::HashMap;

use thiserror::Error;

use crate::config::WorkerConfig;
use crate::core::{ResourceClass, StepRequest};

#[derive(Debug, Clone, Error)]
pub enum QuotaError {
    #[error("Tenant memory quota exceeded: {used_bytes}/{max_bytes} bytes")]
    MemoryExceeded { used_bytes: i64, max_bytes: i64 },
    #[error("Tenant CPU time quota exceeded: {used_ms}/{max_ms} ms")]
    CpuTimeExceeded { used_ms: i64, max_ms: i64 },
}

/// Accumulated usage for one tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantUsage {
    pub mem_bytes: i64,
    pub cpu_time_ms: i64,
}

pub struct Scheduler {
    max_memory_bytes: i64,
    max_cpu_time_ms: i64,
    usage: HashMap<String, TenantUsage>,
}

impl Scheduler {
    pub fn new(config: &WorkerConfig) -> Self {
        Scheduler {
            max_memory_bytes: config.max_memory_per_tenant_mb.saturating_mul(1024 * 1024),
            max_cpu_time_ms: config.max_cpu_time_per_tenant_ms,
            usage: HashMap::new(),
        }
    }

    /// Pool a step is routed to. An explicit `class` of gpu or io wins;
    /// any other value falls through to the block-type prefix rule,
    /// defaulting to CPU.
    pub fn resource_class(req: &StepRequest) -> ResourceClass {
        match req.resources.get("class").map(String::as_str) {
            Some("gpu") => return ResourceClass::Gpu,
            Some("io") => return ResourceClass::Io,
            _ => {}
        }

        let block_type = req.block_type.as_str();
        if block_type.starts_with("http.") || block_type.starts_with("fs.") {
            ResourceClass::Io
        } else if block_type.starts_with("ai.") || block_type.starts_with("media.") {
            ResourceClass::Gpu
        } else {
            ResourceClass::Cpu
        }
    }

    /// Check tenant quotas before a request is admitted to a pool.
    pub fn check_quota(&self, tenant_id: &str) -> Result<(), QuotaError> {
        let usage = self.usage.get(tenant_id).copied().unwrap_or_default();
        if usage.mem_bytes > self.max_memory_bytes {
            return Err(QuotaError::MemoryExceeded {
                used_bytes: usage.mem_bytes,
                max_bytes: self.max_memory_bytes,
            });
        }
        if usage.cpu_time_ms > self.max_cpu_time_ms {
            return Err(QuotaError::CpuTimeExceeded {
                used_ms: usage.cpu_time_ms,
                max_ms: self.max_cpu_time_ms,
            });
        }
        Ok(())
    }

    /// Record resource consumption from a completed step.
    pub fn record_usage(&mut self, tenant_id: &str, cpu_time_ms: i64, mem_bytes: i64) {
        if tenant_id.is_empty() {
            return;
        }
        let usage = self.usage.entry(tenant_id.to_string()).or_default();
        usage.cpu_time_ms = usage.cpu_time_ms.saturating_add(cpu_time_ms.max(0));
        usage.mem_bytes = usage.mem_bytes.saturating_add(mem_bytes.max(0));
    }

    pub fn usage(&self, tenant_id: &str) -> TenantUsage {
        self.usage.get(tenant_id).copied().unwrap_or_default()
    }
}
