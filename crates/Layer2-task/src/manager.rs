//! Task Manager - owns task records and drives their lifecycle
//!
//! Features:
//! - Non-blocking submission: `create_task` returns as soon as the record exists
//! - Bounded concurrency through a semaphore of `max_concurrent` slots
//! - Tasks cancelled while queued never reach the executor
//! - Cancellation of running tasks forwarded to the executor
//! - Query, delete, stats and age-based cleanup

use crate::executor::{CliExecutor, ExecutionRequest, Executor};
use crate::state::TaskState;
use crate::store::{TaskStats, TaskStore};
use crate::task::{CreateTaskRequest, Task, TaskId, TaskOutput};
use futures::FutureExt;
use relay_foundation::{
    Error, RelayConfig, Result, DEFAULT_CLEANUP_MAX_AGE, DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT,
    MAX_TIMEOUT,
};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, info, warn};

/// Configuration for task manager
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Maximum concurrently running tasks
    pub max_concurrent: usize,

    /// Timeout used when a request has none
    pub default_timeout: Duration,

    /// Largest accepted timeout
    pub max_timeout: Duration,

    /// Age used by `cleanup_expired`
    pub cleanup_max_age: Duration,

    /// Terminate the child process when a running task is cancelled.
    ///
    /// When disabled, cancelling a running task only updates the record and
    /// frees its slot at once; the process runs on outside the limit and its
    /// outcome is discarded.
    pub kill_on_cancel: bool,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            default_timeout: DEFAULT_TIMEOUT,
            max_timeout: MAX_TIMEOUT,
            cleanup_max_age: DEFAULT_CLEANUP_MAX_AGE,
            kill_on_cancel: true,
        }
    }
}

impl From<&RelayConfig> for TaskManagerConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            default_timeout: config.default_timeout,
            max_timeout: config.max_timeout,
            cleanup_max_age: config.cleanup_max_age,
            ..Self::default()
        }
    }
}

impl TaskManagerConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_cleanup_max_age(mut self, max_age: Duration) -> Self {
        self.cleanup_max_age = max_age;
        self
    }

    pub fn with_kill_on_cancel(mut self, kill: bool) -> Self {
        self.kill_on_cancel = kill;
        self
    }
}

/// Task Manager - handles task lifecycle and execution
#[derive(Clone)]
pub struct TaskManager {
    /// All task records
    store: Arc<RwLock<TaskStore>>,

    /// Process executor
    executor: Arc<dyn Executor>,

    /// Concurrency slots
    slots: Arc<Semaphore>,

    /// Slots held by running tasks
    permits: Arc<Mutex<HashMap<TaskId, OwnedSemaphorePermit>>>,

    /// Configuration
    config: Arc<TaskManagerConfig>,
}

impl TaskManager {
    /// Create a manager with its own empty store
    pub fn new(config: TaskManagerConfig, executor: Arc<dyn Executor>) -> Self {
        Self::with_store(config, executor, Arc::new(RwLock::new(TaskStore::new())))
    }

    /// Create a manager around an existing store
    pub fn with_store(
        mut config: TaskManagerConfig,
        executor: Arc<dyn Executor>,
        store: Arc<RwLock<TaskStore>>,
    ) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);
        Self {
            store,
            executor,
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            permits: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    /// Default configuration backed by the agent CLI executor
    pub fn with_cli_executor() -> Self {
        Self::new(TaskManagerConfig::default(), Arc::new(CliExecutor::new()))
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<RwLock<TaskStore>> {
        Arc::clone(&self.store)
    }

    fn validate(&self, request: &CreateTaskRequest) -> Result<Duration> {
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        if timeout.is_zero() {
            return Err(Error::Validation("timeout must be positive".to_string()));
        }
        if timeout > self.config.max_timeout {
            return Err(Error::Validation(format!(
                "timeout {}s exceeds the maximum of {}s",
                timeout.as_secs(),
                self.config.max_timeout.as_secs()
            )));
        }

        if let Some(dir) = &request.working_directory {
            if !dir.is_dir() {
                return Err(Error::Config(format!(
                    "Working directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        Ok(timeout)
    }

    /// Submit a new task.
    ///
    /// Validates the request, stores a `pending` record and starts background
    /// execution without waiting for it.
    pub async fn create_task(&self, request: CreateTaskRequest) -> Result<TaskId> {
        let timeout = self.validate(&request)?;

        let task = Task::new(request.description, timeout)
            .with_working_directory(request.working_directory)
            .with_extra_args(request.extra_args);
        let task_id = task.id;

        {
            let mut store = self.store.write().await;
            if !store.insert(task) {
                return Err(Error::Internal(format!("Duplicate task id {}", task_id)));
            }
        }

        info!("Created task {}", task_id);

        let manager = self.clone();
        tokio::spawn(async move { manager.run(task_id).await });

        Ok(task_id)
    }

    /// Background routine: wait for a slot, execute, record the outcome
    async fn run(self, task_id: TaskId) {
        let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
            warn!("Task {} dropped: slot pool closed", task_id);
            return;
        };

        let request = {
            let mut store = self.store.write().await;
            let Some(task) = store.get_mut(&task_id) else {
                debug!("Task {} deleted before it started", task_id);
                return;
            };
            if !task.start() {
                debug!("Task {} not started, state is {}", task_id, task.state);
                return;
            }
            // parked under the store lock so a cancel always finds it
            self.permits.lock().await.insert(task_id, permit);
            ExecutionRequest::from(&*task)
        };

        debug!("Task {} running on {} executor", task_id, self.executor.name());

        let outcome = AssertUnwindSafe(self.executor.execute(&request))
            .catch_unwind()
            .await;

        // held until the outcome is recorded so `running` never exceeds the limit
        let _permit = self.permits.lock().await.remove(&task_id);

        let mut store = self.store.write().await;
        let Some(task) = store.get_mut(&task_id) else {
            debug!("Task {} deleted while running", task_id);
            return;
        };

        let recorded = match outcome {
            Ok(Ok(outcome)) => match outcome.failure {
                None if outcome.result.success => task.complete(outcome.result),
                None => task.fail(Some(outcome.result), "Process reported failure"),
                Some(reason) => task.fail(Some(outcome.result), reason.to_string()),
            },
            Ok(Err(e)) => {
                warn!("Executor error for task {}: {}", task_id, e);
                task.fail(None, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("Executor panicked for task {}: {}", task_id, message);
                task.fail(None, format!("Executor panicked: {}", message))
            }
        };

        if recorded {
            info!("Task {} finished: {}", task_id, task.state);
        } else {
            debug!("Task {} outcome ignored, already {}", task_id, task.state);
        }
    }

    /// Get a task snapshot by ID
    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.store.read().await.get(&task_id).cloned()
    }

    /// Get a task snapshot plus captured output
    pub async fn get_task_result(&self, task_id: TaskId) -> Option<TaskOutput> {
        self.get_task(task_id).await.map(TaskOutput::from)
    }

    /// Cancel a pending or running task.
    ///
    /// Returns false for unknown ids and for tasks already in a terminal state.
    pub async fn cancel_task(&self, task_id: TaskId) -> bool {
        let was_running = {
            let mut store = self.store.write().await;
            let Some(task) = store.get_mut(&task_id) else {
                return false;
            };
            let was_running = task.state.is_running();
            if !task.cancel() {
                return false;
            }
            was_running
        };

        info!("Cancelled task {}", task_id);

        if was_running {
            if self.config.kill_on_cancel {
                if let Err(e) = self.executor.cancel(task_id).await {
                    warn!("Failed to stop process of task {}: {}", task_id, e);
                }
            } else if self.permits.lock().await.remove(&task_id).is_some() {
                debug!("Released slot of cancelled task {}", task_id);
            }
        }

        true
    }

    /// Cancel every pending or running task
    pub async fn cancel_all(&self) -> Vec<TaskId> {
        let active: Vec<TaskId> = {
            let store = self.store.read().await;
            store.iter().filter(|t| t.is_active()).map(|t| t.id).collect()
        };

        let mut cancelled = Vec::with_capacity(active.len());
        for task_id in active {
            if self.cancel_task(task_id).await {
                cancelled.push(task_id);
            }
        }
        cancelled
    }

    /// Remove a task record regardless of its state.
    ///
    /// Does not stop a running process.
    pub async fn delete_task(&self, task_id: TaskId) -> bool {
        let removed = self.store.write().await.remove(&task_id).is_some();
        if removed {
            debug!("Deleted task {}", task_id);
        }
        removed
    }

    /// All task snapshots in creation order
    pub async fn list_tasks(&self) -> Vec<Task> {
        self.store.read().await.iter().cloned().collect()
    }

    /// Counts by state
    pub async fn get_stats(&self) -> TaskStats {
        self.store.read().await.stats()
    }

    /// Number of tasks currently running
    pub async fn running_count(&self) -> usize {
        self.store.read().await.count_in(TaskState::Running)
    }

    /// Remove terminal tasks that completed more than `max_age` ago
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        // an age beyond the representable range is older than any record
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| chrono::Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let removed = self.store.write().await.remove_completed_before(cutoff);

        if removed > 0 {
            debug!("Cleaned up {} tasks older than {:?}", removed, max_age);
        }
        removed
    }

    /// Remove terminal tasks older than the configured `cleanup_max_age`
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup(self.config.cleanup_max_age).await
    }

    /// Poll until the task reaches a terminal state.
    ///
    /// Returns `None` if the task does not exist or is deleted while waiting.
    pub async fn wait(&self, task_id: TaskId, poll: Duration) -> Option<Task> {
        loop {
            let task = self.get_task(task_id).await?;
            if task.state.is_terminal() {
                return Some(task);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
