//! Error types for the supervisor workspace.
//!
//! Two families live here:
//! - [`Error`] for malformed values such as version strings
//! - [`ProcessError`] for anything that concerns the supervised OS process

use thiserror::Error;

/// Result type alias for general operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for general operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input or configuration.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
    },
}

impl Error {
    /// Creates a Validation error.
    ///
    /// # Example
    /// ```
    /// use gsv_common::Error;
    ///
    /// let err = Error::validation("Empty version string");
    /// assert_eq!(err.to_string(), "Validation error: Empty version string");
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

// ==============================================================================
// Process Errors
// ==============================================================================

/// Process-specific error types.
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    /// No process with this id, pid or name exists.
    #[error("Process not found: {id}")]
    NotFound { id: String },

    /// A name lookup matched more than one process.
    #[error("Process name is ambiguous: {name} matches pids {pids:?}")]
    Ambiguous { name: String, pids: Vec<u32> },

    /// The OS refused to start the process.
    #[error("Process spawn failed: {id} - {reason}")]
    SpawnFailed { id: String, reason: String },

    /// Sending a termination request failed.
    #[error("Process stop failed: {id} - {reason}")]
    StopFailed { id: String, reason: String },

    /// Writing to the process's stdin failed.
    #[error("Process input failed: {id} - {reason}")]
    InputFailed { id: String, reason: String },

    /// The process did not reach the expected state in time.
    #[error("Process timeout: {id} - {operation}")]
    Timeout { id: String, operation: String },

    /// The operation is not valid in the current state.
    #[error("Process state error: {id} - expected {expected}, got {actual}")]
    InvalidState {
        id: String,
        expected: String,
        actual: String,
    },

    /// Reading process counters failed.
    #[error("Process monitoring error: {id} - {reason}")]
    MonitoringError { id: String, reason: String },
}

impl ProcessError {
    /// Creates a NotFound error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an Ambiguous error listing every matching pid.
    pub fn ambiguous(name: impl Into<String>, pids: Vec<u32>) -> Self {
        Self::Ambiguous {
            name: name.into(),
            pids,
        }
    }

    /// Creates a SpawnFailed error.
    pub fn spawn_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a StopFailed error.
    pub fn stop_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StopFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an InputFailed error.
    pub fn input_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InputFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a Timeout error for `operation`.
    pub fn timeout(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            id: id.into(),
            operation: operation.into(),
        }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(
        id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a MonitoringError.
    pub fn monitoring(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MonitoringError {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
