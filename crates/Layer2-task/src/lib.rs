//! # relay-task
//!
//! Task execution core for taskrelay.
//! Runs coding-agent CLI invocations as supervised background tasks.
//!
//! ## Features
//!
//! - Task lifecycle with a checked state machine
//! - Bounded concurrency with a FIFO slot queue
//! - Per-task timeout with process-group termination
//! - Cancellation of queued and running tasks
//! - Query, stats and age-based cleanup

pub mod executor;
pub mod manager;
pub mod state;
pub mod store;
pub mod task;

pub use executor::{
    CliExecutor, CliExecutorConfig, ExecutionOutcome, ExecutionRequest, Executor, FailureReason,
    DEFAULT_PROGRAM,
};
pub use manager::{TaskManager, TaskManagerConfig};
pub use state::TaskState;
pub use store::{TaskStats, TaskStore};
pub use task::{CreateTaskRequest, Task, TaskId, TaskOutput, TaskResult};
