//! Engine errors.

use crate::action::ChainKind;
use thiserror::Error;

/// Errors raised by the periodic task engine.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// An action returned an error.
    #[error("{engine}: {chain} action failed: {reason}")]
    ActionFailed {
        engine: String,
        chain: ChainKind,
        reason: String,
    },

    /// An action panicked. The panic payload is kept as text.
    #[error("{engine}: {chain} action panicked: {message}")]
    ActionPanicked {
        engine: String,
        chain: ChainKind,
        message: String,
    },

    /// `start` was called outside a tokio runtime.
    #[error("{engine}: no tokio runtime available to drive ticks")]
    NoRuntime { engine: String },

    /// The engine is destroying or destroyed and cannot be started.
    #[error("{engine}: engine has been destroyed")]
    Destroyed { engine: String },
}

/// Result type for engine control calls.
pub type TaskResult<T> = std::result::Result<T, TaskError>;
