//! Relay Config - defaults shared by the task core and the CLI

use super::LogLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout applied when a request does not specify one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Hard cap on any task timeout
pub const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Tasks allowed in `running` at once
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Age after which terminal tasks are eligible for cleanup
pub const DEFAULT_CLEANUP_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Top-level runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Verbosity
    #[serde(default)]
    pub log_level: LogLevel,

    /// Concurrency budget
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Default per-task timeout
    #[serde(default = "default_timeout")]
    pub default_timeout: Duration,

    /// Upper bound for any per-task timeout
    #[serde(default = "max_timeout")]
    pub max_timeout: Duration,

    /// Age threshold for `cleanup`
    #[serde(default = "default_cleanup_max_age")]
    pub cleanup_max_age: Duration,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn max_timeout() -> Duration {
    MAX_TIMEOUT
}

fn default_cleanup_max_age() -> Duration {
    DEFAULT_CLEANUP_MAX_AGE
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            default_timeout: DEFAULT_TIMEOUT,
            max_timeout: MAX_TIMEOUT,
            cleanup_max_age: DEFAULT_CLEANUP_MAX_AGE,
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults plus the log level from the environment.
    ///
    /// The verbosity is the only setting read from outside the process.
    pub fn from_env() -> Self {
        Self {
            log_level: LogLevel::from_env(),
            ..Self::default()
        }
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}
