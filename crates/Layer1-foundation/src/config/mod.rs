//! Config - runtime settings
//!
//! - `log_level.rs` - verbosity read from the environment
//! - `relay.rs` - RelayConfig defaults (timeouts, concurrency, cleanup age)

mod log_level;
mod relay;

pub use log_level::{LogLevel, LOG_LEVEL_ENV};
pub use relay::{
    RelayConfig, DEFAULT_CLEANUP_MAX_AGE, DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT, MAX_TIMEOUT,
};
