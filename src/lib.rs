pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod task;

// Re-export common types
pub use cluster::{Membership, TaskRing};
pub use config::ServerConfig;
pub use dispatch::{DistributedTaskService, ExecutionOutcome, PollReport};
pub use error::{DispatchError, Result, StoreError};
pub use task::{
    ActionHandler, DistributedTask, EngineType, InMemoryTaskStore, TargetApp, TaskAction, TaskStatus,
    TaskStore,
};
