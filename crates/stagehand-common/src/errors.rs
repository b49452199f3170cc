//! Error types for process orchestration.

use thiserror::Error;

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Process-specific error types.
///
/// Each variant names the process involved so failures are always
/// attributable in logs and reports.
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    #[error("Process not found: {name}")]
    NotFound { name: String },

    #[error("Process already registered: {name}")]
    AlreadyExists { name: String },

    #[error("Process spawn failed: {name} - {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("Process stop failed: {name} - {reason}")]
    StopFailed { name: String, reason: String },

    #[error("Process timeout: {name} - {operation}")]
    Timeout { name: String, operation: String },

    #[error("Process state error: {name} - expected {expected}, got {actual}")]
    InvalidState {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Process configuration error: {name} - {reason}")]
    Configuration { name: String, reason: String },

    #[error("Operation not supported on this platform: {operation}")]
    Unsupported { operation: String },
}

impl ProcessError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    pub fn spawn_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn stop_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StopFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            name: name.into(),
            operation: operation.into(),
        }
    }

    pub fn invalid_state(
        name: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            name: name.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn configuration(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }
}
