//! Task executors
//!
//! - `CliExecutor` - runs the coding-agent CLI as a supervised child process
//! - `args` - argument vector construction and working-directory resolution

pub mod args;
pub mod cli;
pub mod r#trait;

pub use cli::{CliExecutor, CliExecutorConfig, DEFAULT_PROGRAM};
pub use r#trait::{ExecutionOutcome, ExecutionRequest, Executor, FailureReason};
