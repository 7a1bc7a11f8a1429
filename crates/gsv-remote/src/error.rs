//! Remote channel errors.

use thiserror::Error;

/// Failures of one remote session step.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// No session could be attempted at all.
    #[error("Remote channel unavailable: {reason}")]
    Unavailable { reason: String },

    /// The transport could not reach the endpoint.
    #[error("Remote connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    /// The server rejected the shared secret.
    #[error("Remote authentication rejected by {endpoint}")]
    Auth { endpoint: String },

    /// The command was sent but the session failed.
    #[error("Remote command {command:?} failed: {reason}")]
    Execute { command: String, reason: String },

    /// Closing the session failed. Logged only.
    #[error("Remote disconnect failed: {reason}")]
    Disconnect { reason: String },
}

impl RemoteError {
    /// Creates an Unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Creates a Connect error.
    pub fn connect(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates an Execute error.
    pub fn execute(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execute {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for transport and session calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
