//! Error types for taskrelay
//!
//! Every fallible API in the workspace returns this error.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// taskrelay error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // Task / execution
    // ========================================================================
    #[error("Task error: {0}")]
    Task(String),

    // ========================================================================
    // General
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors raised before any work starts (bad directory, bad timeout).
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_classification() {
        assert!(Error::Config("missing dir".into()).is_config());
        assert!(Error::Validation("timeout".into()).is_config());
        assert!(!Error::Task("boom".into()).is_config());
    }

    #[test]
    fn test_display() {
        let err = Error::Validation("timeout must be at most 3600s".into());
        assert_eq!(
            err.to_string(),
            "Validation error: timeout must be at most 3600s"
        );
        assert_eq!(
            Error::Internal("duplicate id".into()).to_string(),
            "Internal error: duplicate id"
        );
    }
}
