//! Engine lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`PeriodicTaskEngine`](crate::PeriodicTaskEngine).
///
/// `Initialized -> Running <-> Paused -> Destroying -> Destroyed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Created, never started
    Initialized,
    /// Ticking on the configured interval
    Running,
    /// Ticks suspended, chains preserved
    Paused,
    /// Waiting for the grace period before the final chain runs
    Destroying,
    /// Final chain has run; the engine is inert
    Destroyed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Initialized => write!(f, "initialized"),
            TaskState::Running => write!(f, "running"),
            TaskState::Paused => write!(f, "paused"),
            TaskState::Destroying => write!(f, "destroying"),
            TaskState::Destroyed => write!(f, "destroyed"),
        }
    }
}

impl TaskState {
    /// Check if the engine can never tick again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Destroying | TaskState::Destroyed)
    }

    /// Check if the engine is currently ticking.
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Destroying.is_terminal());
        assert!(TaskState::Destroyed.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
        assert!(!TaskState::Initialized.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(TaskState::Running.to_string(), "running");
        assert_eq!(TaskState::Destroying.to_string(), "destroying");
    }
}
