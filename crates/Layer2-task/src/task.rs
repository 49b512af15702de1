//! Task definition and types

use crate::state::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the full hyphenated form
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// First 8 characters, for log lines and tables
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters accepted by `TaskManager::create_task`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    /// Natural-language instruction handed to the agent
    pub description: String,

    /// Directory the agent works in; defaults to the current directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// Wall-clock limit; defaults to the manager's default timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Extra CLI arguments for the agent
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl CreateTaskRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout_secs(self, secs: u64) -> Self {
        self.with_timeout(Duration::from_secs(secs))
    }

    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// A task tracked by the manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Instruction text
    pub description: String,

    /// Working directory override
    pub working_directory: Option<PathBuf>,

    /// Timeout duration
    pub timeout: Duration,

    /// Extra CLI arguments
    pub extra_args: Vec<String>,

    /// Current state
    pub state: TaskState,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// When the task started executing
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Captured process result (completed or failed only)
    pub result: Option<TaskResult>,

    /// Failure message
    pub error: Option<String>,
}

impl Task {
    /// Create a pending task
    pub fn new(description: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: TaskId::new(),
            description: description.into(),
            working_directory: None,
            timeout,
            extra_args: Vec::new(),
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn with_working_directory(mut self, dir: Option<PathBuf>) -> Self {
        self.working_directory = dir;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Mark task as running. Returns false if not pending.
    pub fn start(&mut self) -> bool {
        if !self.state.can_transition_to(TaskState::Running) {
            return false;
        }
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now().max(self.created_at));
        true
    }

    /// Mark task as completed successfully
    pub fn complete(&mut self, result: TaskResult) -> bool {
        if !self.state.can_transition_to(TaskState::Completed) {
            return false;
        }
        self.state = TaskState::Completed;
        self.result = Some(result);
        self.stamp_completion();
        true
    }

    /// Mark task as failed, keeping whatever output was captured
    pub fn fail(&mut self, result: Option<TaskResult>, error: impl Into<String>) -> bool {
        if !self.state.can_transition_to(TaskState::Failed) {
            return false;
        }
        self.state = TaskState::Failed;
        self.result = result;
        self.error = Some(error.into());
        self.stamp_completion();
        true
    }

    /// Mark task as cancelled
    pub fn cancel(&mut self) -> bool {
        if !self.state.can_transition_to(TaskState::Cancelled) {
            return false;
        }
        self.state = TaskState::Cancelled;
        self.stamp_completion();
        true
    }

    fn stamp_completion(&mut self) {
        let floor = self.started_at.unwrap_or(self.created_at);
        self.completed_at = Some(Utc::now().max(floor));
    }

    /// Check if task is still active (pending or running)
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Get execution duration if task has started
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }
}

/// Result of one agent process run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Exit code, `None` if the process was never observed to exit normally
    pub exit_code: Option<i32>,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Exit code 0 with no timeout
    pub success: bool,
}

impl TaskResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn with_exit_code(
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: exit_code == 0,
        }
    }
}

/// Task snapshot plus captured output, as returned by `get_task_result`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutput {
    pub task: Task,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl From<Task> for TaskOutput {
    fn from(task: Task) -> Self {
        let (stdout, stderr) = match &task.result {
            Some(result) => (Some(result.stdout.clone()), Some(result.stderr.clone())),
            None => (None, None),
        };
        Self {
            task,
            stdout,
            stderr,
        }
    }
}
