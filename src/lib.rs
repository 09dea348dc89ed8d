pub mod actors;
pub mod config;
pub mod core;
pub mod error;
pub mod executors;
pub mod ingress;
pub mod observability;
pub mod sandbox;
pub mod scheduler;

pub use crate::actors::{WorkerRuntime, WorkerRuntimeBuilder};
pub use crate::config::{FeatureFlags, WorkerConfig};
pub use crate::core::{
    BlockContext, BlockMetrics, ResourceClass, ResultMetadata, RetryConfig, RetryPolicy,
    StepRequest, StepResult, StepStatus, TimeoutPolicy,
};
pub use crate::error::{ErrorCode, WorkerError};
pub use crate::executors::{BlockExecutor, ExecutorRegistry};
pub use crate::ingress::{ExecAssignment, ResultPublisher, ResultSink};
pub use crate::observability::Observability;
pub use crate::scheduler::Scheduler;
