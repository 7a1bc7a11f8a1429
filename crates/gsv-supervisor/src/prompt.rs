//! Operator confirmation after a crash.

use async_trait::async_trait;
use std::io::{BufRead, Write};
use tracing::warn;

/// Decides whether a crashed server is started again.
///
/// Consulted only when auto-live is off. The answer may take arbitrarily
/// long; an operator shutdown abandons the question.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    /// Ask whether the crashed server should be started again.
    async fn confirm_restart(&self) -> bool;
}

/// Asks on the controlling terminal. Anything but `y`/`yes` declines.
#[derive(Debug, Default, Clone)]
pub struct StdinPrompt;

#[async_trait]
impl OperatorPrompt for StdinPrompt {
    async fn confirm_restart(&self) -> bool {
        let answer = tokio::task::spawn_blocking(|| {
            print!("The server exited unexpectedly. Restart it? [y/N] ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_yes(&line),
            Ok(Err(e)) => {
                warn!("Could not read operator answer: {}", e);
                false
            }
            Err(e) => {
                warn!("Operator prompt task failed: {}", e);
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Always restarts, for headless deployments.
#[derive(Debug, Default, Clone)]
pub struct AlwaysRestart;

#[async_trait]
impl OperatorPrompt for AlwaysRestart {
    async fn confirm_restart(&self) -> bool {
        true
    }
}

/// Never restarts.
#[derive(Debug, Default, Clone)]
pub struct NeverRestart;

#[async_trait]
impl OperatorPrompt for NeverRestart {
    async fn confirm_restart(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }

    #[tokio::test]
    async fn test_fixed_prompts() {
        assert!(AlwaysRestart.confirm_restart().await);
        assert!(!NeverRestart.confirm_restart().await);
    }
}
