//! Block executors and the type registry.
//!
//! Each block type (e.g. `http.request`) implements [`BlockExecutor`]. The
//! [`ExecutorRegistry`] maps type strings to shared executor instances; it is
//! built once at startup and read-only afterwards.

pub mod base;
pub mod fs;
pub mod http;
pub mod human;
pub mod sql;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{FeatureFlags, WorkerConfig};
use crate::core::{BlockContext, BlockMetrics, ResourceClass, StepRequest, StepResult, TimeoutPolicy};
use crate::error::WorkerError;

/// Uniform capability surface for one block type.
///
/// `execute` must never fail across this seam: every failure mode becomes a
/// valid [`StepResult`] with a populated error code, and metadata is always
/// copied from the supplied context.
#[async_trait]
pub trait BlockExecutor: Send + Sync {
    /// Stable block type identifier, e.g. `"http.request"`.
    fn block_type(&self) -> &str;

    /// Pool the block is routed to by default.
    fn resource_class(&self) -> ResourceClass;

    /// Called once per executor instance at registration.
    async fn init(&self, _ctx: &BlockContext) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult;

    /// Best-effort abort of in-flight work for a step.
    async fn cancel(&self, _step_id: &str) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Snapshot of accumulated execution metrics.
    fn metrics(&self) -> BlockMetrics;
}

/// Read-mostly mapping `block_type -> executor`, immutable after startup.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn BlockExecutor>>,
}

impl ExecutorRegistry {
    pub fn empty() -> Self {
        ExecutorRegistry {
            executors: HashMap::new(),
        }
    }

    /// Registry with all built-in block types, configured from the worker
    /// config and feature flags.
    pub fn with_builtins(config: &WorkerConfig, flags: &FeatureFlags) -> Self {
        let timeouts = TimeoutPolicy::new(flags);
        let prefixes = Arc::new(config.fs_allowed_prefixes.clone());

        let mut registry = ExecutorRegistry::empty();
        registry.register(Arc::new(http::HttpBlockExecutor::new(timeouts)));
        registry.register(Arc::new(fs::FsBlobPutExecutor::new(
            prefixes.clone(),
            timeouts,
        )));
        registry.register(Arc::new(fs::FsBlobGetExecutor::new(prefixes, timeouts)));
        registry.register(Arc::new(sql::SqlQueryExecutor::new()));
        registry.register(Arc::new(human::HumanApprovalExecutor::new()));
        registry
    }

    /// Registry serving deterministic mock responses for every built-in
    /// block type (dry-run mode).
    pub fn with_mocks() -> Self {
        let mut registry = ExecutorRegistry::empty();
        for (block_type, class) in [
            ("http.request", ResourceClass::Io),
            ("fs.blob_put", ResourceClass::Io),
            ("fs.blob_get", ResourceClass::Io),
            ("sql.query", ResourceClass::Cpu),
            ("human.approval", ResourceClass::Cpu),
        ] {
            registry.register(Arc::new(crate::sandbox::MockBlockExecutor::new(
                block_type, class,
            )));
        }
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn BlockExecutor>) {
        self.executors
            .insert(executor.block_type().to_string(), executor);
    }

    pub fn get(&self, block_type: &str) -> Option<Arc<dyn BlockExecutor>> {
        self.executors.get(block_type).cloned()
    }

    pub fn block_types(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn BlockExecutor>)> {
        self.executors.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contents() {
        let registry =
            ExecutorRegistry::with_builtins(&WorkerConfig::default(), &FeatureFlags::default());
        for block_type in [
            "http.request",
            "fs.blob_put",
            "fs.blob_get",
            "sql.query",
            "human.approval",
        ] {
            let executor = registry.get(block_type).expect(block_type);
            assert_eq!(executor.block_type(), block_type);
        }
        assert!(registry.get("no.such_block").is_none());
    }

    #[test]
    fn test_resource_classes() {
        let registry =
            ExecutorRegistry::with_builtins(&WorkerConfig::default(), &FeatureFlags::default());
        assert_eq!(
            registry.get("http.request").unwrap().resource_class(),
            ResourceClass::Io
        );
        assert_eq!(
            registry.get("sql.query").unwrap().resource_class(),
            ResourceClass::Cpu
        );
    }
}
