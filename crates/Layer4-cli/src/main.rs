//! taskrelay CLI - Main entry point

mod format;

use anyhow::Context;
use clap::{Parser, Subcommand};
use relay_foundation::{LogLevel, RelayConfig};
use relay_task::{
    CliExecutor, CreateTaskRequest, Executor, TaskId, TaskManager, TaskManagerConfig, TaskState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const WAIT_POLL: Duration = Duration::from_millis(200);

/// taskrelay - run coding-agent tasks with bounded concurrency
#[derive(Parser, Debug)]
#[command(name = "taskrelay")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one or more tasks and wait for them to finish
    Run {
        /// Task descriptions, one agent process each
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Working directory handed to the agent
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Per-task timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Extra argument passed through to the agent (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        extra_args: Vec<String>,

        /// Maximum number of agents running at once
        #[arg(short = 'j', long)]
        max_concurrent: Option<usize>,

        /// Print results as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Check whether the agent CLI is installed
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = RelayConfig::from_env();
    if args.debug {
        config = config.with_log_level(LogLevel::Debug);
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.as_filter())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match args.command {
        Command::Check => check(),
        Command::Run {
            tasks,
            cwd,
            timeout,
            extra_args,
            max_concurrent,
            json,
        } => {
            if let Some(max) = max_concurrent {
                config = config.with_max_concurrent(max);
            }
            let request = RunRequest {
                tasks,
                cwd,
                timeout: timeout.map(Duration::from_secs),
                extra_args,
                json,
            };
            let all_succeeded = run(&config, request).await?;
            if !all_succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn check() -> anyhow::Result<()> {
    let executor = CliExecutor::new();
    let program = &executor.config().program;
    match executor.program_path() {
        Some(path) => {
            println!("✓ {} found at {}", program, path.display());
            Ok(())
        }
        None => anyhow::bail!(
            "'{}' command not found. Install the agent CLI and make sure it is on PATH",
            program
        ),
    }
}

struct RunRequest {
    tasks: Vec<String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
    extra_args: Vec<String>,
    json: bool,
}

/// Submit every task, wait for all of them and print the results.
/// Returns whether every task completed.
async fn run(config: &RelayConfig, request: RunRequest) -> anyhow::Result<bool> {
    let executor = CliExecutor::new();
    if !executor.is_available() {
        warn!("Agent CLI '{}' not found on PATH", executor.config().program);
    }

    let manager = TaskManager::new(
        TaskManagerConfig::from(config),
        Arc::new(executor) as Arc<dyn Executor>,
    );

    let mut ids: Vec<TaskId> = Vec::with_capacity(request.tasks.len());
    for description in request.tasks {
        let mut task = CreateTaskRequest::new(description.clone())
            .with_extra_args(request.extra_args.iter().cloned());
        if let Some(dir) = &request.cwd {
            task = task.with_working_directory(dir.clone());
        }
        if let Some(timeout) = request.timeout {
            task = task.with_timeout(timeout);
        }

        let id = manager
            .create_task(task)
            .await
            .with_context(|| format!("Failed to submit task: {}", description))?;
        ids.push(id);
    }

    info!(
        "Submitted {} tasks, running up to {} at once",
        ids.len(),
        manager.config().max_concurrent
    );

    let waiting = futures::future::join_all(ids.iter().map(|id| manager.wait(*id, WAIT_POLL)));
    tokio::pin!(waiting);

    tokio::select! {
        _ = &mut waiting => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            let cancelled = manager.cancel_all().await;
            eprintln!("Interrupted, cancelled {} task(s)", cancelled.len());
            waiting.await;
        }
    }

    let mut outputs = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(output) = manager.get_task_result(*id).await {
            outputs.push(output);
        }
    }

    if request.json {
        let stats = manager.get_stats().await;
        let report = serde_json::json!({ "tasks": outputs, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for output in &outputs {
            println!("{}", format::render_output(output));
        }
        if outputs.len() > 1 {
            println!("{}", format::render_stats(&manager.get_stats().await));
        }
    }

    Ok(outputs
        .iter()
        .all(|output| output.task.state == TaskState::Completed))
}
