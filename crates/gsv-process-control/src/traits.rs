//! The seam between the supervisor and the processes it runs.
//!
//! [`ProcessLauncher`] creates runs, [`ProcessHandle`] controls one. The
//! supervisor only ever talks to these traits.

use crate::events::{ProcessEvents, ProcessExit};
use async_trait::async_trait;
use gsv_common::ProcessResult;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What to run.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Identifier used in logs and errors.
    pub id: String,
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Working directory, or the supervisor's own when `None`.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables on top of the inherited ones.
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Run `program` with no arguments, the inherited working directory and environment.
    pub fn new(id: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Replace the argument list.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A started process together with its notification channels.
pub struct LaunchedProcess {
    /// Control surface for the run.
    pub handle: Arc<dyn ProcessHandle>,
    /// Output and lifecycle notifications for the run.
    pub events: ProcessEvents,
}

/// Control surface of one running process.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Identifier from the [`LaunchSpec`].
    fn id(&self) -> &str;

    /// OS pid, once spawned.
    fn pid(&self) -> Option<u32>;

    /// Whether the exit has been observed.
    fn has_exited(&self) -> bool;

    /// Write one line to the process's stdin. No-op once the process has exited.
    async fn send(&self, line: &str) -> ProcessResult<()>;

    /// Optionally send `command`, wait up to `timeout` for exit, then kill.
    async fn request_stop(&self, command: Option<&str>, timeout: Duration) -> ProcessResult<()>;

    /// Wait up to `timeout` for the process to exit.
    async fn wait_exit(&self, timeout: Duration) -> Option<ProcessExit>;
}

/// Starts processes. Each launch yields a new, independent handle.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn `spec`. A failure leaves no process behind.
    async fn launch(&self, spec: &LaunchSpec) -> ProcessResult<LaunchedProcess>;
}
