//! Manager + CLI executor integration tests against a fake agent binary
//!
//! `cargo test -p relay-task --test manager_test`

#![cfg(unix)]

use relay_task::{
    CliExecutor, CliExecutorConfig, CreateTaskRequest, Executor, TaskManager, TaskManagerConfig,
    TaskState,
};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(20);

/// Writes a stand-in agent that evaluates its last argument as shell.
/// Also records the full argument vector next to it.
fn fake_agent() -> PathBuf {
    let path = std::env::temp_dir().join(format!("fake-agent-{}", uuid::Uuid::new_v4()));
    let script = format!(
        "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}.args'\nfor last; do :; done\neval \"$last\"\n",
        path.display()
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn manager_with(program: &PathBuf, max_concurrent: usize) -> TaskManager {
    let executor = CliExecutor::with_config(
        CliExecutorConfig::default()
            .with_program(program.to_string_lossy())
            .with_kill_grace_period(Duration::from_millis(500))
            .with_drain_timeout(Duration::from_millis(500)),
    );
    TaskManager::new(
        TaskManagerConfig::default().with_max_concurrent(max_concurrent),
        Arc::new(executor) as Arc<dyn Executor>,
    )
}

#[tokio::test]
async fn test_completed_task_has_output() {
    let agent = fake_agent();
    let manager = manager_with(&agent, 3);

    let id = manager
        .create_task(CreateTaskRequest::new("echo hello from agent"))
        .await
        .unwrap();
    let task = manager.wait(id, POLL).await.unwrap();

    assert_eq!(task.state, TaskState::Completed);
    let output = manager.get_task_result(id).await.unwrap();
    assert_eq!(output.stdout.as_deref(), Some("hello from agent\n"));
    assert_eq!(output.task.result.unwrap().exit_code, Some(0));
}

#[tokio::test]
async fn test_argument_layout() {
    let agent = fake_agent();
    let manager = manager_with(&agent, 1);
    let dir = std::fs::canonicalize(std::env::temp_dir()).unwrap();

    let id = manager
        .create_task(
            CreateTaskRequest::new("true")
                .with_working_directory(dir.clone())
                .with_extra_args(["--model", "sonnet", "--yes", "--print"]),
        )
        .await
        .unwrap();
    manager.wait(id, POLL).await.unwrap();

    let recorded = std::fs::read_to_string(format!("{}.args", agent.display())).unwrap();
    let args: Vec<&str> = recorded.lines().collect();
    let dir = dir.to_string_lossy();
    assert_eq!(args, vec!["--add-dir", dir.as_ref(), "--model", "sonnet", "-p", "true"]);
}

#[tokio::test]
async fn test_timeout_fails_quickly() {
    let agent = fake_agent();
    let manager = manager_with(&agent, 1);

    let started = Instant::now();
    let id = manager
        .create_task(CreateTaskRequest::new("sleep 10").with_timeout(Duration::from_millis(100)))
        .await
        .unwrap();
    let task = manager.wait(id, POLL).await.unwrap();

    assert_eq!(task.state, TaskState::Failed);
    assert!(task.error.unwrap().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_non_zero_exit_fails_with_stderr() {
    let agent = fake_agent();
    let manager = manager_with(&agent, 1);

    let id = manager
        .create_task(CreateTaskRequest::new("echo oops >&2; exit 2"))
        .await
        .unwrap();
    let task = manager.wait(id, POLL).await.unwrap();

    assert_eq!(task.state, TaskState::Failed);
    let result = task.result.unwrap();
    assert_eq!(result.exit_code, Some(2));
    assert_eq!(result.stderr, "oops\n");
    assert!(!result.success);
}

#[tokio::test]
async fn test_missing_agent_binary() {
    let missing = std::env::temp_dir().join(format!("no-such-agent-{}", uuid::Uuid::new_v4()));
    let manager = manager_with(&missing, 1);

    let id = manager
        .create_task(CreateTaskRequest::new("anything"))
        .await
        .unwrap();
    let task = manager.wait(id, POLL).await.unwrap();

    assert_eq!(task.state, TaskState::Failed);
    assert!(task.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn test_cancel_running_stops_process() {
    let agent = fake_agent();
    let manager = manager_with(&agent, 1);

    let id = manager
        .create_task(CreateTaskRequest::new("sleep 30"))
        .await
        .unwrap();
    for _ in 0..250 {
        if manager.get_task(id).await.unwrap().state == TaskState::Running {
            break;
        }
        tokio::time::sleep(POLL).await;
    }

    let started = Instant::now();
    assert!(manager.cancel_task(id).await);

    // the slot frees once the process is gone; a follow-up task must run promptly
    let next = manager
        .create_task(CreateTaskRequest::new("echo next"))
        .await
        .unwrap();
    let next = manager.wait(next, POLL).await.unwrap();
    assert_eq!(next.state, TaskState::Completed);
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(manager.get_task(id).await.unwrap().state, TaskState::Cancelled);
}

#[tokio::test]
async fn test_queue_respects_limit() {
    let agent = fake_agent();
    let manager = manager_with(&agent, 2);

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            manager
                .create_task(CreateTaskRequest::new(format!("sleep 0.1; echo {i}")))
                .await
                .unwrap(),
        );
    }

    let mut done = 0;
    while done < ids.len() {
        let stats = manager.get_stats().await;
        assert!(stats.running <= 2);
        done = stats.completed + stats.failed;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for (i, id) in ids.iter().enumerate() {
        let output = manager.get_task_result(*id).await.unwrap();
        assert_eq!(output.stdout.unwrap(), format!("{i}\n"));
    }
}
