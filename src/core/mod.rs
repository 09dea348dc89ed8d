pub mod convert;
pub mod retry;
pub mod timeout;
pub mod types;

pub use retry::{RetryConfig, RetryPolicy};
pub use timeout::{FsOp, TimeoutPolicy};
pub use types::{
    BlockContext, BlockMetrics, ResourceClass, ResultMetadata, StepRequest, StepResult, StepStatus,
};
