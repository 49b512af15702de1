//! CLI executor - runs the coding-agent CLI as a child process
//!
//! Features:
//! - Direct executable lookup on PATH (no shell in between)
//! - Incremental stdout/stderr capture, kept on timeout or crash
//! - Wall-clock timeout: SIGTERM, then SIGKILL after a grace period
//! - Process group killing on Unix, so tools started by the agent die too
//! - Cancellation of an in-flight child through `Executor::cancel`

use crate::executor::args::{build_args, resolve_working_dir, DEFAULT_DENIED_FLAGS};
use crate::executor::{ExecutionOutcome, ExecutionRequest, Executor, FailureReason};
use crate::task::{TaskId, TaskResult};
use async_trait::async_trait;
use relay_foundation::Result;
use std::collections::HashMap;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default agent binary
pub const DEFAULT_PROGRAM: &str = "claude";

/// CLI executor configuration
#[derive(Debug, Clone)]
pub struct CliExecutorConfig {
    /// Agent binary name or path
    pub program: String,
    /// Flag granting the agent access to the working directory
    pub add_dir_flag: String,
    /// Flag selecting one-shot, non-interactive mode; followed by the task text
    pub prompt_flag: String,
    /// Caller flags that are silently dropped
    pub denied_flags: Vec<String>,
    /// Time between SIGTERM and SIGKILL on timeout or cancellation
    pub kill_grace_period: Duration,
    /// How long to wait for pipes to drain after the child exits
    pub drain_timeout: Duration,
    /// How long a cancel for a task that is not executing is kept, in case
    /// `execute` for it is about to start
    pub early_cancel_ttl: Duration,
}

impl Default for CliExecutorConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            add_dir_flag: "--add-dir".to_string(),
            prompt_flag: "-p".to_string(),
            denied_flags: DEFAULT_DENIED_FLAGS.iter().map(|s| s.to_string()).collect(),
            kill_grace_period: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
            early_cancel_ttl: Duration::from_secs(30),
        }
    }
}

impl CliExecutorConfig {
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_kill_grace_period(mut self, grace: Duration) -> Self {
        self.kill_grace_period = grace;
        self
    }

    pub fn with_drain_timeout(mut self, drain: Duration) -> Self {
        self.drain_timeout = drain;
        self
    }

    pub fn with_early_cancel_ttl(mut self, ttl: Duration) -> Self {
        self.early_cancel_ttl = ttl;
        self
    }
}

/// Per-task kill switch
struct KillSwitch {
    notify: Arc<Notify>,
    /// Owned by a running `execute`; otherwise a cancel waiting for one
    in_flight: bool,
    created: Instant,
}

impl KillSwitch {
    fn new(in_flight: bool) -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            in_flight,
            created: Instant::now(),
        }
    }
}

/// Executor that launches one agent CLI process per task
pub struct CliExecutor {
    /// Kill switches, by task
    processes: Arc<RwLock<HashMap<TaskId, KillSwitch>>>,

    /// Configuration
    config: CliExecutorConfig,
}

impl CliExecutor {
    /// Create a new CLI executor
    pub fn new() -> Self {
        Self::with_config(CliExecutorConfig::default())
    }

    /// Create with configuration
    pub fn with_config(config: CliExecutorConfig) -> Self {
        Self {
            processes: Arc::new(RwLock::new(HashMap::with_capacity(8))),
            config,
        }
    }

    pub fn config(&self) -> &CliExecutorConfig {
        &self.config
    }

    /// Full path of the agent binary, if it can be found
    pub fn program_path(&self) -> Option<PathBuf> {
        which::which(&self.config.program).ok()
    }

    /// Program to spawn, or `None` when nothing by that name exists.
    ///
    /// A path that exists but fails the lookup (e.g. not executable) is
    /// passed to `spawn` so the OS error is reported instead of "not found".
    fn resolve_program(&self) -> Option<PathBuf> {
        let program = &self.config.program;
        match which::which(program) {
            Ok(path) => Some(path),
            Err(which::Error::CannotFindBinaryPath) if !Path::new(program).exists() => None,
            Err(e) => {
                debug!("Lookup of '{}' failed ({}), spawning it directly", program, e);
                Some(PathBuf::from(program))
            }
        }
    }

    /// Check if the agent binary is installed
    pub fn is_available(&self) -> bool {
        self.program_path().is_some()
    }

    /// Tasks currently inside `execute`
    pub async fn running_processes(&self) -> Vec<TaskId> {
        self.processes
            .read()
            .await
            .iter()
            .filter(|(_, switch)| switch.in_flight)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Send `signal` to the child's process group
    #[cfg(unix)]
    fn signal_group(child: &Child, signal: Signal) {
        if let Some(pid) = child.id() {
            // the child leads its own group, created at spawn time
            if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
                debug!("{} to group {} failed: {}", signal, pid, e);
            }
        }
    }

    /// Ask the child to stop (SIGTERM to its group on Unix)
    #[cfg(unix)]
    fn terminate(child: &mut Child) {
        Self::signal_group(child, Signal::SIGTERM);
    }

    #[cfg(not(unix))]
    fn terminate(child: &mut Child) {
        // no graceful signal on this platform
        Self::force_kill(child);
    }

    /// Kill the child and anything it started
    fn force_kill(child: &mut Child) {
        #[cfg(unix)]
        Self::signal_group(child, Signal::SIGKILL);
        if let Err(e) = child.start_kill() {
            debug!("Kill failed: {}", e);
        }
    }

    /// Wait for the child while racing the deadline and the kill switch.
    ///
    /// Returns the exit status together with the reason the process was
    /// stopped, if it was. A stop reason always takes precedence over the
    /// exit status that follows it.
    async fn supervise(
        &self,
        child: &mut Child,
        timeout: Duration,
        kill: &Notify,
    ) -> (std::io::Result<ExitStatus>, Option<FailureReason>) {
        enum Event {
            Exited(std::io::Result<ExitStatus>),
            Deadline,
            Cancel,
            Grace,
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let grace = tokio::time::sleep(self.config.kill_grace_period);
        tokio::pin!(grace);
        let mut grace_armed = false;
        let mut stop: Option<FailureReason> = None;

        loop {
            let event = tokio::select! {
                status = child.wait() => Event::Exited(status),
                _ = &mut deadline, if stop.is_none() => Event::Deadline,
                _ = kill.notified(), if stop.is_none() => Event::Cancel,
                _ = &mut grace, if grace_armed => Event::Grace,
            };

            let reason = match event {
                Event::Exited(status) => return (status, stop),
                Event::Grace => {
                    warn!("Grace period expired, killing process {:?}", child.id());
                    Self::force_kill(child);
                    grace_armed = false;
                    continue;
                }
                Event::Deadline => {
                    warn!("Process {:?} exceeded timeout {:?}", child.id(), timeout);
                    FailureReason::Timeout(timeout)
                }
                Event::Cancel => {
                    info!("Terminating process {:?} on cancellation", child.id());
                    FailureReason::Cancelled
                }
            };

            stop = Some(reason);
            Self::terminate(child);
            grace
                .as_mut()
                .reset(tokio::time::Instant::now() + self.config.kill_grace_period);
            grace_armed = true;
        }
    }

    /// Wait for the pipe readers, abandoning them after `drain_timeout`
    async fn drain(&self, mut handles: Vec<JoinHandle<()>>) {
        let all = futures::future::join_all(handles.iter_mut());
        if tokio::time::timeout(self.config.drain_timeout, all)
            .await
            .is_err()
        {
            debug!("Output pipe still open after exit, abandoning readers");
            for handle in &handles {
                handle.abort();
            }
        }
    }

    /// Drop cancels that no `execute` picked up within `early_cancel_ttl`
    fn prune(&self, processes: &mut HashMap<TaskId, KillSwitch>) {
        let ttl = self.config.early_cancel_ttl;
        processes.retain(|_, switch| switch.in_flight || switch.created.elapsed() < ttl);
    }

    /// Claim the kill switch for an execution.
    ///
    /// `Notify` keeps a permit, so a cancel that landed before the child was
    /// spawned still stops it.
    async fn register(&self, task_id: TaskId) -> Arc<Notify> {
        let mut processes = self.processes.write().await;
        self.prune(&mut processes);
        let switch = processes
            .entry(task_id)
            .or_insert_with(|| KillSwitch::new(true));
        switch.in_flight = true;
        Arc::clone(&switch.notify)
    }

    /// Spawn and supervise one agent process
    async fn run_process(
        &self,
        request: &ExecutionRequest,
        kill: &Notify,
    ) -> Result<ExecutionOutcome> {
        let working_dir = resolve_working_dir(request.working_directory.as_deref())?;

        let args = build_args(
            &self.config.add_dir_flag,
            &self.config.prompt_flag,
            &self.config.denied_flags,
            &working_dir,
            &request.extra_args,
            &request.description,
        );

        let Some(program) = self.resolve_program() else {
            warn!("Agent CLI '{}' not found on PATH", self.config.program);
            return Ok(not_found(&self.config.program));
        };

        debug!(
            "Executing task {}: {} {:?} in {}",
            request.task_id,
            program.display(),
            args,
            working_dir.display()
        );

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(not_found(&self.config.program));
            }
            Err(e) => {
                warn!("Failed to spawn agent for task {}: {}", request.task_id, e);
                return Ok(ExecutionOutcome::failed(
                    TaskResult::default(),
                    FailureReason::Spawn(e.to_string()),
                ));
            }
        };

        info!("Task {} spawned agent process {:?}", request.task_id, child.id());

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_reader(pipe, Arc::clone(&stdout_buf)));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_reader(pipe, Arc::clone(&stderr_buf)));
        }

        let (status, stop) = self.supervise(&mut child, request.timeout, kill).await;

        self.drain(readers).await;

        let result = TaskResult {
            exit_code: status.as_ref().ok().and_then(|s| s.code()),
            stdout: take_text(&stdout_buf).await,
            stderr: take_text(&stderr_buf).await,
            success: false,
        };

        let outcome = match (stop, status) {
            (Some(reason), _) => ExecutionOutcome::failed(result, reason),
            (None, Ok(status)) if status.success() => ExecutionOutcome::succeeded(TaskResult {
                success: true,
                ..result
            }),
            (None, Ok(status)) => {
                let reason = match status.code() {
                    Some(code) => FailureReason::NonZeroExit(code),
                    None => FailureReason::Signaled,
                };
                ExecutionOutcome::failed(result, reason)
            }
            (None, Err(e)) => ExecutionOutcome::failed(result, FailureReason::Io(e.to_string())),
        };

        debug!(
            "Task {} process finished: exit_code={:?} failure={:?}",
            request.task_id, outcome.result.exit_code, outcome.failure
        );

        Ok(outcome)
    }
}

impl Default for CliExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy a pipe into `buffer` chunk by chunk until EOF
fn spawn_reader<R>(mut pipe: R, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.lock().await.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!("Pipe read error: {}", e);
                    break;
                }
            }
        }
    })
}

async fn take_text(buffer: &Mutex<Vec<u8>>) -> String {
    String::from_utf8_lossy(&buffer.lock().await).into_owned()
}

fn not_found(program: &str) -> ExecutionOutcome {
    ExecutionOutcome::failed(
        TaskResult::default(),
        FailureReason::NotFound {
            program: program.to_string(),
        },
    )
}

#[async_trait]
impl Executor for CliExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
        let kill = self.register(request.task_id).await;
        let outcome = self.run_process(request, &kill).await;
        self.processes.write().await.remove(&request.task_id);
        outcome
    }

    async fn cancel(&self, task_id: TaskId) -> Result<()> {
        let mut processes = self.processes.write().await;
        self.prune(&mut processes);
        match processes.get(&task_id) {
            Some(switch) => {
                switch.notify.notify_one();
                info!("Cancellation sent to task {}", task_id);
            }
            None => {
                // execute may not have started yet; leave a primed switch
                let switch = KillSwitch::new(false);
                switch.notify.notify_one();
                processes.insert(task_id, switch);
                debug!("Task {} not executing, cancel held for pickup", task_id);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cli"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;

    /// Fake agent: runs its last argument (the task text) as a shell script.
    fn fake_agent() -> PathBuf {
        let path = std::env::temp_dir().join(format!("fake-agent-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, "#!/bin/sh\nfor last; do :; done\neval \"$last\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn executor() -> CliExecutor {
        let config = CliExecutorConfig::default()
            .with_program(fake_agent().to_string_lossy())
            .with_kill_grace_period(Duration::from_millis(500))
            .with_drain_timeout(Duration::from_millis(500));
        CliExecutor::with_config(config)
    }

    fn request(script: &str, timeout: Duration) -> ExecutionRequest {
        ExecutionRequest {
            task_id: TaskId::new(),
            description: script.to_string(),
            working_directory: None,
            timeout,
            extra_args: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_execute_success_captures_output() {
        let outcome = executor()
            .execute(&request(
                "printf 'hello\\n'; printf 'warn' >&2",
                Duration::from_secs(10),
            ))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.result.exit_code, Some(0));
        assert_eq!(outcome.result.stdout, "hello\n");
        assert_eq!(outcome.result.stderr, "warn");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure_not_error() {
        let outcome = executor()
            .execute(&request("echo partial; exit 3", Duration::from_secs(10)))
            .await
            .unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.result.exit_code, Some(3));
        assert_eq!(outcome.failure, Some(FailureReason::NonZeroExit(3)));
        assert_eq!(outcome.result.stdout, "partial\n");
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let started = Instant::now();
        let outcome = executor()
            .execute(&request("echo before; sleep 10", Duration::from_millis(100)))
            .await
            .unwrap();

        assert!(outcome.is_timeout());
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.stdout, "before\n");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_timeout_beats_zero_exit_after_sigterm() {
        // the script exits 0 when terminated; still a timeout
        let outcome = executor()
            .execute(&request(
                "trap 'exit 0' TERM; while true; do sleep 0.05; done",
                Duration::from_millis(100),
            ))
            .await
            .unwrap();

        assert!(outcome.is_timeout());
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_missing_binary_is_failed_outcome() {
        let executor = CliExecutor::with_config(
            CliExecutorConfig::default().with_program("definitely-not-an-agent-cli-xyz"),
        );
        assert!(!executor.is_available());

        let outcome = executor
            .execute(&request("anything", Duration::from_secs(1)))
            .await
            .unwrap();

        assert!(matches!(
            outcome.failure,
            Some(FailureReason::NotFound { .. })
        ));
        assert!(outcome.result.exit_code.is_none());
        assert!(outcome.failure.unwrap().to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_error() {
        let mut req = request("true", Duration::from_secs(1));
        req.working_directory = Some(
            std::env::temp_dir().join(format!("relay-missing-{}", uuid::Uuid::new_v4())),
        );

        let err = executor().execute(&req).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = std::env::temp_dir().join(format!("relay-cwd-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut req = request("pwd -P", Duration::from_secs(10));
        req.working_directory = Some(dir.clone());

        let outcome = executor().execute(&req).await.unwrap();
        let expected = std::fs::canonicalize(&dir).unwrap();
        assert_eq!(outcome.result.stdout.trim(), expected.to_string_lossy());
    }

    #[tokio::test]
    async fn test_cancel_terminates_child() {
        let executor = Arc::new(executor());
        let req = request("sleep 10", Duration::from_secs(30));
        let task_id = req.task_id;

        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(&req).await })
        };

        // wait until the child is registered
        for _ in 0..100 {
            if executor.running_processes().await.contains(&task_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        executor.cancel(task_id).await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(outcome.failure, Some(FailureReason::Cancelled));
        assert!(executor.running_processes().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_executable_agent_is_spawn_error() {
        let path = std::env::temp_dir().join(format!("plain-agent-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let executor = CliExecutor::with_config(
            CliExecutorConfig::default().with_program(path.to_string_lossy()),
        );
        assert!(!executor.is_available());

        let outcome = executor
            .execute(&request("anything", Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(
            matches!(outcome.failure, Some(FailureReason::Spawn(_))),
            "unexpected failure: {:?}",
            outcome.failure
        );
        assert!(!outcome.failure.unwrap().to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_cancel_before_execute_is_picked_up() {
        let executor = executor();
        let req = request("sleep 10", Duration::from_secs(30));

        executor.cancel(req.task_id).await.unwrap();
        assert!(executor.running_processes().await.is_empty());

        let started = Instant::now();
        let outcome = executor.execute(&req).await.unwrap();
        assert_eq!(outcome.failure, Some(FailureReason::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(executor.processes.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_cancels_are_pruned() {
        let executor = CliExecutor::with_config(
            CliExecutorConfig::default()
                .with_program(fake_agent().to_string_lossy())
                .with_early_cancel_ttl(Duration::from_millis(10)),
        );

        // cancels for tasks that already finished or never run
        for _ in 0..20 {
            executor.cancel(TaskId::new()).await.unwrap();
        }
        assert_eq!(executor.processes.read().await.len(), 20);

        tokio::time::sleep(Duration::from_millis(30)).await;
        executor.cancel(TaskId::new()).await.unwrap();
        assert_eq!(executor.processes.read().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let outcome = executor
            .execute(&request("echo ok", Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert!(executor.processes.read().await.is_empty());
    }
}
