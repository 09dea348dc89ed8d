//! The three-tier actor hierarchy: Worker -> ResourcePool -> Executor.
//!
//! Each actor is a tokio task owning its state exclusively and processing
//! one mailbox message at a time; results travel back as values over
//! consumed oneshot channels, which makes terminal publication exactly-once
//! by construction.

pub mod executor;
pub mod pool;
pub mod worker;

pub use executor::{spawn_executor_actor, ExecutorHandle, ExecutorMsg};
pub use pool::{spawn_pool_actor, PoolConfig, PoolHandle, PoolMsg, PoolSnapshot};
pub use worker::{WorkerMsg, WorkerRuntime, WorkerRuntimeBuilder};
