//! Executor trait

use crate::task::{Task, TaskId, TaskResult};
use async_trait::async_trait;
use relay_foundation::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Everything an executor needs to run one task
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task_id: TaskId,
    pub description: String,
    pub working_directory: Option<PathBuf>,
    pub timeout: Duration,
    pub extra_args: Vec<String>,
}

impl From<&Task> for ExecutionRequest {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            description: task.description.clone(),
            working_directory: task.working_directory.clone(),
            timeout: task.timeout,
            extra_args: task.extra_args.clone(),
        }
    }
}

/// Why an execution did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Wall-clock limit hit; the process was terminated
    Timeout(Duration),
    /// Process exited with a non-zero code
    NonZeroExit(i32),
    /// Process was killed by a signal it did not choose
    Signaled,
    /// Agent binary is not installed or not on PATH
    NotFound { program: String },
    /// Any other spawn error
    Spawn(String),
    /// Terminated on request
    Cancelled,
    /// Waiting on the child failed
    Io(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout(after) => {
                write!(f, "Task timed out after {}ms", after.as_millis())
            }
            FailureReason::NonZeroExit(code) => write!(f, "Process exited with code {}", code),
            FailureReason::Signaled => write!(f, "Process terminated by signal"),
            FailureReason::NotFound { program } => write!(
                f,
                "'{}' command not found. Install the agent CLI and make sure it is on PATH",
                program
            ),
            FailureReason::Spawn(e) => write!(f, "Failed to spawn process: {}", e),
            FailureReason::Cancelled => write!(f, "Process terminated on cancellation"),
            FailureReason::Io(e) => write!(f, "Process error: {}", e),
        }
    }
}

/// What an executor reports back; failures are data, not errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub result: TaskResult,
    pub failure: Option<FailureReason>,
}

impl ExecutionOutcome {
    pub fn succeeded(result: TaskResult) -> Self {
        Self {
            result,
            failure: None,
        }
    }

    pub fn failed(mut result: TaskResult, reason: FailureReason) -> Self {
        result.success = false;
        Self {
            result,
            failure: Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.result.success
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, Some(FailureReason::Timeout(_)))
    }
}

/// Executor trait - implement to add new execution backends
///
/// `execute` returns `Err` only when a precondition fails (e.g. the working
/// directory does not exist). Everything that goes wrong once execution has
/// begun is reported through `ExecutionOutcome::failure`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a task
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome>;

    /// Terminate the process of a running task, if any
    async fn cancel(&self, task_id: TaskId) -> Result<()>;

    /// Get executor name
    fn name(&self) -> &'static str;
}
