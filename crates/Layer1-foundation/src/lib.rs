//! # relay-foundation
//!
//! Foundation layer for taskrelay:
//! - Error: the workspace-wide error enum and `Result` alias
//! - Config: log level and runtime defaults (timeouts, concurrency, cleanup age)

pub mod config;
pub mod error;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    LogLevel, RelayConfig, DEFAULT_CLEANUP_MAX_AGE, DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT,
    LOG_LEVEL_ENV, MAX_TIMEOUT,
};
