//! Task records
//!
//! - Record model and action enumeration
//! - Store abstraction with an in-memory backend
//! - Action handler seam to the job-management layer

pub mod handler;
pub mod model;
pub mod store;

pub use handler::{ActionHandler, LoggingActionHandler};
pub use model::{DistributedTask, EngineType, NewTask, TargetApp, TaskAction, TaskStatus};
pub use store::{InMemoryTaskStore, TaskOutcome, TaskStore};
