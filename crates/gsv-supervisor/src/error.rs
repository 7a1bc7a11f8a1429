//! Supervisor errors.

use gsv_common::ProcessError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by [`ServerSupervisor`](crate::ServerSupervisor).
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The install directory or server binary could not be prepared.
    #[error("Setup failed: {message}")]
    Setup { message: String },

    /// Launching or stopping the server process failed.
    #[error("Server process error: {0}")]
    Process(#[from] ProcessError),

    /// The configuration failed validation.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Archiving the save data failed.
    #[error("Backup failed: {message}")]
    Backup { message: String },

    /// The server's settings file could not be read or written.
    #[error("Server settings error in {path}: {message}")]
    Settings { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Creates a Setup error.
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    /// Creates a Backup error.
    pub fn backup(message: impl Into<String>) -> Self {
        Self::Backup {
            message: message.into(),
        }
    }

    /// Creates a Settings error for the file at `path`.
    pub fn settings(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Settings {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for supervisor operations.
pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;
