//! Task dispatch
//!
//! Routes task records to their owning server and runs the poll loop that
//! executes locally owned work.

pub mod service;

pub use service::{DistributedTaskService, ExecutionOutcome, PollReport};
