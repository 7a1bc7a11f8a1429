//! Single-run process controller.
//!
//! [`ProcessController::start`] spawns the child with all three standard
//! streams piped, records its pid and publishes [`ProcessEvents`]:
//!
//! - `started` resolves right after the spawn
//! - stdout and stderr are pumped line by line until the pipes close
//! - a monitor task reaps the child and classifies the exit
//!
//! Stopping first sends the optional stop command on stdin, then waits for
//! a natural exit, then force-kills through `gsv-process`. On Linux the child
//! also gets `PR_SET_PDEATHSIG` so it dies with the supervisor.

use crate::events::{EventSenders, ProcessEvents, ProcessExit};
use crate::traits::{LaunchSpec, ProcessHandle};
use async_trait::async_trait;
use gsv_common::{ProcessError, ProcessResult};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// How long to wait for a forcibly killed process to be reaped.
pub const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(3);

const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a controller is in its single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// `start` has not succeeded yet.
    NotStarted,
    /// The child is alive.
    Started,
    /// The child exited with code zero.
    ExitedNormally,
    /// The child exited non-zero or was killed.
    ExitedUnexpectedly,
}

type SharedStdin = Arc<tokio::sync::Mutex<ChildStdin>>;

/// Owns one child process for its whole lifetime.
///
/// The child is moved into a monitor task that reaps it; everything else
/// (stdin writes, termination) goes through the pid.
///
/// # Example
/// ```no_run
/// use gsv_process_control::{LaunchSpec, ProcessController, ProcessExit, ProcessHandle};
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let controller = ProcessController::new("game-server");
/// let spec = LaunchSpec::new("game-server", "/opt/server/run.sh").args(["-port=8211"]);
/// let mut events = controller.start(&spec)?;
///
/// while let Some(line) = events.output.recv().await {
///     if line.contains("Running") {
///         break;
///     }
/// }
///
/// controller.request_stop(Some("quit"), Duration::from_secs(10)).await?;
/// let exit: ProcessExit = events.exit.await?;
/// println!("server exited: {exit:?}");
/// # Ok(())
/// # }
/// ```
pub struct ProcessController {
    id: String,
    state: Arc<Mutex<ControllerState>>,
    pid: Mutex<Option<u32>>,
    stdin: Arc<Mutex<Option<SharedStdin>>>,
    stop_requested: Arc<AtomicBool>,
    exit_watch: Arc<watch::Sender<Option<ProcessExit>>>,
}

impl ProcessController {
    /// Create a controller for the process known as `id` in logs and errors.
    pub fn new(id: impl Into<String>) -> Self {
        let (exit_watch, _) = watch::channel(None);
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(ControllerState::NotStarted)),
            pid: Mutex::new(None),
            stdin: Arc::new(Mutex::new(None)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            exit_watch: Arc::new(exit_watch),
        }
    }

    /// Current run state.
    pub fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    /// Spawn the child. Succeeds at most once per controller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, spec: &LaunchSpec) -> ProcessResult<ProcessEvents> {
        {
            let state = self.state.lock();
            if *state != ControllerState::NotStarted {
                return Err(ProcessError::invalid_state(
                    &self.id,
                    "NotStarted",
                    format!("{:?}", *state),
                ));
            }
        }

        info!("Spawning process: {} ({})", self.id, spec.program.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);

        if let Some(ref wd) = spec.working_dir {
            cmd.current_dir(wd);
        }

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Take the child down with us if the supervisor dies without cleanup
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL)
                    .map_err(std::io::Error::from)
            });
        }

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ProcessError::spawn_failed(&self.id, format!("{}: {}", spec.program.display(), e))
        })?;

        let pid = child.id();
        *self.pid.lock() = pid;
        *self.state.lock() = ControllerState::Started;

        let (senders, events) = ProcessEvents::channel();
        let EventSenders {
            started,
            output,
            errors,
            exit: exit_tx,
        } = senders;
        let _ = started.send(pid);

        let stdout_pump = child.stdout.take().map(|s| tokio::spawn(pump_lines(s, output)));
        let stderr_pump = child.stderr.take().map(|s| tokio::spawn(pump_lines(s, errors)));
        if let Some(stdin) = child.stdin.take() {
            *self.stdin.lock() = Some(Arc::new(tokio::sync::Mutex::new(stdin)));
        }

        let id = self.id.clone();
        let state = Arc::clone(&self.state);
        let stdin_slot = Arc::clone(&self.stdin);
        let stop_requested = Arc::clone(&self.stop_requested);
        let exit_watch = Arc::clone(&self.exit_watch);

        tokio::spawn(async move {
            let status = child.wait().await;

            for pump in [stdout_pump, stderr_pump].into_iter().flatten() {
                if timeout(OUTPUT_DRAIN_TIMEOUT, pump).await.is_err() {
                    debug!("Output pump for {} still open after exit", id);
                }
            }
            stdin_slot.lock().take();

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    error!("Failed to wait for process {}: {}", id, e);
                    None
                }
            };

            let exit = ProcessExit::from_code(code, stop_requested.load(Ordering::SeqCst));
            *state.lock() = if exit.is_unexpected() {
                ControllerState::ExitedUnexpectedly
            } else {
                ControllerState::ExitedNormally
            };

            match exit {
                ProcessExit::Normal => info!("Process {} {}", id, exit),
                ProcessExit::Unexpected { .. } => warn!("Process {} {}", id, exit),
            }

            exit_watch.send_replace(Some(exit));
            let _ = exit_tx.send(exit);
        });

        info!("Process spawned successfully: {} (PID: {:?})", self.id, pid);
        Ok(events)
    }
}

/// Forward `reader` line by line until EOF. Invalid UTF-8 is replaced.
async fn pump_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                // Keep draining even if nobody listens, or the child blocks on a full pipe
                let _ = tx.send(line.to_string());
            }
            Err(e) => {
                debug!("Output pump stopped: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl ProcessHandle for ProcessController {
    fn id(&self) -> &str {
        &self.id
    }

    fn pid(&self) -> Option<u32> {
        *self.pid.lock()
    }

    fn has_exited(&self) -> bool {
        self.exit_watch.borrow().is_some()
    }

    async fn send(&self, line: &str) -> ProcessResult<()> {
        let slot = self.stdin.lock().clone();
        let stdin = match slot {
            Some(stdin) if !self.has_exited() => stdin,
            _ => {
                debug!("Dropping input for {}: process not running", self.id);
                return Ok(());
            }
        };

        let mut stdin = stdin.lock().await;
        let mut payload = String::with_capacity(line.len() + 1);
        payload.push_str(line);
        payload.push('\n');

        let result = match stdin.write_all(payload.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("Input pipe for {} closed: {}", self.id, e);
                Ok(())
            }
            Err(e) => Err(ProcessError::input_failed(&self.id, e.to_string())),
        }
    }

    /// Marks the stop as requested before anything else, so the resulting
    /// exit reports `stop_requested`.
    async fn request_stop(&self, command: Option<&str>, timeout: Duration) -> ProcessResult<()> {
        let pid = match self.pid() {
            Some(pid) => pid,
            None => {
                debug!("No process PID to stop for {}", self.id);
                return Ok(());
            }
        };

        if self.has_exited() {
            return Ok(());
        }

        self.stop_requested.store(true, Ordering::SeqCst);

        if let Some(command) = command {
            info!("Sending stop command to {}: {}", self.id, command);
            if let Err(e) = self.send(command).await {
                warn!("Failed to send stop command to {}: {}", self.id, e);
            }
        }

        if self.wait_exit(timeout).await.is_some() {
            info!("Process stopped: {}", self.id);
            return Ok(());
        }

        warn!(
            "Process {} (PID: {}) did not exit within {:?}, forcing termination",
            self.id, pid, timeout
        );

        if let Err(e) = gsv_process::force_kill(pid) {
            error!("Force kill failed for {} (PID: {}): {}", self.id, pid, e);
        }

        if self.wait_exit(FORCE_KILL_TIMEOUT).await.is_some() {
            info!("Process terminated after force kill: {}", self.id);
            return Ok(());
        }

        Err(ProcessError::timeout(
            &self.id,
            format!(
                "stop (did not exit after {:?} + force-kill timeout {:?})",
                timeout, FORCE_KILL_TIMEOUT
            ),
        ))
    }

    async fn wait_exit(&self, limit: Duration) -> Option<ProcessExit> {
        let mut rx = self.exit_watch.subscribe();
        let exit = match timeout(limit, rx.wait_for(Option::is_some)).await {
            Ok(Ok(exit)) => *exit,
            _ => None,
        };
        exit
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        if self.has_exited() {
            return;
        }
        if let Some(pid) = *self.pid.lock() {
            warn!("Controller for {} dropped while PID {} is alive, killing it", self.id, pid);
            if let Err(e) = gsv_process::force_kill(pid) {
                error!("Force kill on drop failed for {}: {}", self.id, e);
            }
        }
    }
}

impl std::fmt::Debug for ProcessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessController")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_controller_is_not_started() {
        let controller = ProcessController::new("server");
        assert_eq!(controller.state(), ControllerState::NotStarted);
        assert_eq!(controller.pid(), None);
        assert!(!controller.has_exited());
    }

    #[tokio::test]
    async fn test_stop_is_noop_when_not_started() {
        let controller = ProcessController::new("server");
        controller
            .request_stop(Some("quit"), Duration::from_millis(10))
            .await
            .unwrap();
        controller.send("hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_controller_unstarted() {
        let controller = ProcessController::new("server");
        let spec = LaunchSpec::new("server", "/definitely/not/a/real/binary");

        let err = controller.start(&spec).unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
        assert_eq!(controller.state(), ControllerState::NotStarted);
        assert_eq!(controller.pid(), None);
    }
}
