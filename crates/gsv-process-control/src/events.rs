//! Exit classification and per-run notification channels.

use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exit code zero.
    Normal,
    /// Non-zero exit code, or death by signal (`code == None`).
    Unexpected {
        code: Option<i32>,
        /// A stop had been requested before the process died.
        stop_requested: bool,
    },
}

impl ProcessExit {
    /// Classify an exit code. Only `Some(0)` is normal; `None` means a signal.
    pub fn from_code(code: Option<i32>, stop_requested: bool) -> Self {
        match code {
            Some(0) => ProcessExit::Normal,
            code => ProcessExit::Unexpected {
                code,
                stop_requested,
            },
        }
    }

    /// Whether this exit counts as a crash candidate.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, ProcessExit::Unexpected { .. })
    }

    /// Exit code, `None` when killed by a signal.
    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessExit::Normal => Some(0),
            ProcessExit::Unexpected { code, .. } => *code,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Normal => write!(f, "exited normally"),
            ProcessExit::Unexpected {
                code: Some(code),
                stop_requested,
            } => write!(f, "exited unexpectedly with code {} (stop requested: {})", code, stop_requested),
            ProcessExit::Unexpected {
                code: None,
                stop_requested,
            } => write!(f, "terminated by signal (stop requested: {})", stop_requested),
        }
    }
}

/// Receiving side of one run's notifications.
///
/// `started` resolves with the pid right after the spawn, `output` and
/// `errors` yield stdout and stderr lines, and `exit` resolves once.
#[derive(Debug)]
pub struct ProcessEvents {
    /// Resolves with the pid once the child is spawned.
    pub started: oneshot::Receiver<Option<u32>>,
    /// Stdout lines without their line terminator.
    pub output: mpsc::UnboundedReceiver<String>,
    /// Stderr lines without their line terminator.
    pub errors: mpsc::UnboundedReceiver<String>,
    /// Resolves exactly once with the exit.
    pub exit: oneshot::Receiver<ProcessExit>,
}

/// Producing side of [`ProcessEvents`].
#[derive(Debug)]
pub struct EventSenders {
    pub started: oneshot::Sender<Option<u32>>,
    pub output: mpsc::UnboundedSender<String>,
    pub errors: mpsc::UnboundedSender<String>,
    pub exit: oneshot::Sender<ProcessExit>,
}

impl ProcessEvents {
    /// A connected sender and receiver pair for one run.
    pub fn channel() -> (EventSenders, ProcessEvents) {
        let (started_tx, started_rx) = oneshot::channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        (
            EventSenders {
                started: started_tx,
                output: output_tx,
                errors: errors_tx,
                exit: exit_tx,
            },
            ProcessEvents {
                started: started_rx,
                output: output_rx,
                errors: errors_rx,
                exit: exit_rx,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_classification() {
        assert_eq!(ProcessExit::from_code(Some(0), false), ProcessExit::Normal);
        assert_eq!(ProcessExit::from_code(Some(0), true), ProcessExit::Normal);
        assert_eq!(
            ProcessExit::from_code(Some(3), false),
            ProcessExit::Unexpected {
                code: Some(3),
                stop_requested: false
            }
        );
        assert!(ProcessExit::from_code(None, true).is_unexpected());
        assert_eq!(ProcessExit::from_code(None, true).code(), None);
    }

    #[tokio::test]
    async fn test_event_channel_delivers() {
        let (senders, mut events) = ProcessEvents::channel();
        senders.started.send(Some(42)).unwrap();
        senders.output.send("hello".to_string()).unwrap();
        senders.exit.send(ProcessExit::Normal).unwrap();

        assert_eq!(events.started.await.unwrap(), Some(42));
        assert_eq!(events.output.recv().await.as_deref(), Some("hello"));
        assert_eq!(events.exit.await.unwrap(), ProcessExit::Normal);
    }
}
