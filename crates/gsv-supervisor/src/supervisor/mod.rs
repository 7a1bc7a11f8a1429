//! The server supervisor.
//!
//! [`ServerSupervisor`] owns one run of the game server at a time: the
//! process handle, its resource sampler, the remote command channel and the
//! reboot and backup timers. `start`, `shutdown`, exit handling and
//! scheduled reboots exclude each other through a single lifecycle lock, so
//! exit events and timers can never interleave with a half-finished
//! transition.
//!
//! The waits before an automatic restart happen outside the lock: the
//! operator prompt after a crash and the restart delay. Either may take
//! long, and an operator shutdown must not queue behind them. Every call to
//! [`ServerSupervisor::shutdown`] bumps a counter before it takes the lock.
//! A pending restart that sees the counter move gives up, and one that does
//! get to restart re-checks the counter and its run id under the lock first.

mod lifecycle;
mod maintenance;
mod timers;


use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::installer::{Installer, MissingBinaryInstaller};
use crate::prompt::{OperatorPrompt, StdinPrompt};
use crate::settings::ServerSettings;
use crate::status::{SupervisorPhase, SupervisorStatus};
use chrono::{DateTime, Local};
use gsv_common::ServerVersion;
use gsv_process_control::{LaunchSpec, ProcessHandle, ProcessLauncher, SystemLauncher};
use gsv_remote::{RemoteCommandChannel, RemoteEndpoint, RemoteTransport, UnavailableTransport};
use gsv_resource_monitor::{ProcessProbe, ResourceSample, ResourceSampler, SysinfoProbe};
use gsv_task::PeriodicTaskEngine;
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

const SERVER_ID: &str = "game-server";

/// Supervises the game server process.
#[derive(Clone)]
pub struct ServerSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: SupervisorConfig,
    launcher: Arc<dyn ProcessLauncher>,
    probe: Arc<dyn ProcessProbe>,
    transport: Arc<dyn RemoteTransport>,
    prompt: Arc<dyn OperatorPrompt>,
    installer: Arc<dyn Installer>,

    lifecycle: tokio::sync::Mutex<()>,
    state: Mutex<RunState>,
    channel: Mutex<Option<Arc<RemoteCommandChannel>>>,
    status_engine: Mutex<Option<PeriodicTaskEngine>>,

    backup_lock: tokio::sync::Mutex<()>,
    backups: watch::Sender<Option<PathBuf>>,
    exit_request: watch::Sender<Option<i32>>,
    /// Bumped by every operator shutdown, before it waits for the lifecycle lock.
    shutdowns: watch::Sender<u64>,
}

/// Everything that changes between runs.
struct RunState {
    phase: SupervisorPhase,
    running: bool,
    run_id: u64,
    process: Option<Arc<dyn ProcessHandle>>,
    sampler: Option<ResourceSampler>,
    timers: Option<CancellationToken>,
    uptime_since: Option<Instant>,
    uptime: Duration,
    crash_count: u32,
    last_crash: Option<DateTime<Local>>,
    last_backup: Option<PathBuf>,
    server_version: Option<ServerVersion>,
    last_sample: Option<ResourceSample>,
    reboot_in_progress: bool,
    /// Shutdown count when the current run started.
    shutdown_epoch: u64,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: SupervisorPhase::Stopped,
            running: false,
            run_id: 0,
            process: None,
            sampler: None,
            timers: None,
            uptime_since: None,
            uptime: Duration::ZERO,
            crash_count: 0,
            last_crash: None,
            last_backup: None,
            server_version: None,
            last_sample: None,
            reboot_in_progress: false,
            shutdown_epoch: 0,
        }
    }
}

/// Wires collaborators into a [`ServerSupervisor`]. Anything not set uses
/// the production implementation.
pub struct SupervisorBuilder {
    config: SupervisorConfig,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    probe: Option<Arc<dyn ProcessProbe>>,
    transport: Option<Arc<dyn RemoteTransport>>,
    prompt: Option<Arc<dyn OperatorPrompt>>,
    installer: Option<Arc<dyn Installer>>,
}

impl SupervisorBuilder {
    /// Launch server runs through `launcher` instead of [`SystemLauncher`].
    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Read resource counters through `probe` instead of [`SysinfoProbe`].
    pub fn probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Open remote sessions through `transport`. Without one the channel never
    /// authenticates and every shutdown is a forced stop.
    pub fn transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Ask `prompt` before restarting after a crash. Defaults to [`StdinPrompt`].
    pub fn prompt(mut self, prompt: Arc<dyn OperatorPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Install a missing server binary with `installer`.
    pub fn installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Validate the configuration and assemble the supervisor.
    ///
    /// Nothing is started; call [`ServerSupervisor::initialize`] next.
    pub fn build(self) -> SupervisorResult<ServerSupervisor> {
        self.config.validate().map_err(|e| SupervisorError::Config {
            message: format!("{:#}", e),
        })?;

        let (backups, _) = watch::channel(None);
        let (exit_request, _) = watch::channel(None);
        let (shutdowns, _) = watch::channel(0);

        Ok(ServerSupervisor {
            inner: Arc::new(Inner {
                config: self.config,
                launcher: self.launcher.unwrap_or_else(|| Arc::new(SystemLauncher::new())),
                probe: self.probe.unwrap_or_else(|| Arc::new(SysinfoProbe::new())),
                transport: self.transport.unwrap_or_else(|| Arc::new(UnavailableTransport)),
                prompt: self.prompt.unwrap_or_else(|| Arc::new(StdinPrompt)),
                installer: self.installer.unwrap_or_else(|| Arc::new(MissingBinaryInstaller)),
                lifecycle: tokio::sync::Mutex::new(()),
                state: Mutex::new(RunState::default()),
                channel: Mutex::new(None),
                status_engine: Mutex::new(None),
                backup_lock: tokio::sync::Mutex::new(()),
                backups,
                exit_request,
                shutdowns,
            }),
        })
    }
}

impl ServerSupervisor {
    /// Start building a supervisor for `config`.
    pub fn builder(config: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder {
            config,
            launcher: None,
            probe: None,
            transport: None,
            prompt: None,
            installer: None,
        }
    }

    /// Configuration the supervisor was built with.
    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Prepare the installation and start the server.
    ///
    /// In order:
    ///
    /// 1. create the install directory
    /// 2. run the [`Installer`] when the server binary is missing
    /// 3. enable remote access in the server settings, generating a secret
    ///    if there is none, and build the remote channel from them
    /// 4. start status reporting when `status_interval` is non-zero
    /// 5. [`start`](Self::start) the server
    ///
    /// # Errors
    ///
    /// - [`SupervisorError::Setup`] when the install directory cannot be
    ///   created or the binary is still missing after the installer ran
    /// - [`SupervisorError::Settings`] when the settings file is unreadable
    /// - [`SupervisorError::Process`] when the server fails to launch
    pub async fn initialize(&self) -> SupervisorResult<()> {
        self.inner.prepare_install().await?;

        let channel = self.inner.prepare_remote_channel()?;
        *self.inner.channel.lock() = Some(Arc::new(channel));

        self.inner.start_status_reporting();
        self.start().await
    }

    /// Start the server unless it is already running.
    ///
    /// Launches a new run, starts its resource sampler, arms the reboot and
    /// backup timers, waits `startup_grace` and then tries to authenticate
    /// the remote channel. A channel that stays unavailable is logged and
    /// tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Process`] when the launch fails. The
    /// supervisor is `Stopped` afterwards.
    pub async fn start(&self) -> SupervisorResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.start_locked().await
    }

    /// Stop the server, gracefully when the remote channel is up.
    ///
    /// The run is quiesced first: timers cancelled, uptime frozen, sampler
    /// destroyed. Then the optional shutdown backup is taken. With an
    /// authenticated channel the server gets a shutdown command and a
    /// once-per-second countdown broadcast, followed by `exit_grace` to
    /// leave on its own. Without one, or if it overstays, it is stopped
    /// through the process handle with `forced_stop_timeout`.
    ///
    /// A crash recovery still waiting on the operator prompt or the restart
    /// delay is abandoned. Calling this while stopped is a no-op.
    pub async fn shutdown(&self) -> SupervisorResult<()> {
        self.inner.shutdowns.send_modify(|count| *count += 1);
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.shutdown_locked().await
    }

    /// Archive the save data now. Failures are logged and yield `None`.
    ///
    /// The server is asked to flush its world first, over the remote channel
    /// when it is up and through the console otherwise. Concurrent backups
    /// run one after the other.
    pub async fn backup(&self) -> Option<PathBuf> {
        self.inner.backup().await
    }

    /// Stop status reporting. Call once the supervisor is done for good.
    pub fn close(&self) {
        if let Some(engine) = self.inner.status_engine.lock().take() {
            engine.destroy(Duration::ZERO);
        }
    }

    /// Snapshot of the current run and counters.
    pub fn status(&self) -> SupervisorStatus {
        self.inner.status()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SupervisorPhase {
        self.inner.state.lock().phase
    }

    /// Whether a server run is active. Never true while a shutdown is in progress.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Unexpected exits observed so far.
    pub fn crash_count(&self) -> u32 {
        self.inner.state.lock().crash_count
    }

    /// Remote channel, once [`initialize`](Self::initialize) has built it.
    pub fn remote_channel(&self) -> Option<Arc<RemoteCommandChannel>> {
        self.inner.channel.lock().clone()
    }

    /// Path of the most recent successful backup, updated as backups finish.
    pub fn backups(&self) -> watch::Receiver<Option<PathBuf>> {
        self.inner.backups.subscribe()
    }

    /// Resolves with an exit code once the supervisor wants the program to end.
    ///
    /// Currently that happens when the operator declines a restart after a
    /// crash, with code `0`.
    pub async fn wait_for_exit_request(&self) -> i32 {
        let mut rx = self.inner.exit_request.subscribe();
        let code = match rx.wait_for(Option::is_some).await {
            Ok(code) => (*code).unwrap_or(0),
            Err(_) => 0,
        };
        code
    }
}

impl Inner {
    async fn prepare_install(&self) -> SupervisorResult<()> {
        let install_dir = &self.config.server.install_dir;
        tokio::fs::create_dir_all(install_dir).await.map_err(|e| {
            SupervisorError::setup(format!(
                "cannot create install directory {}: {}",
                install_dir.display(),
                e
            ))
        })?;

        let executable = self.config.executable_path();
        if !executable.exists() {
            warn!("Server binary {} not found, running installer", executable.display());
            self.installer.install(&self.config).await?;
            if !executable.exists() {
                return Err(SupervisorError::setup(format!(
                    "installer finished but {} is still missing",
                    executable.display()
                )));
            }
        }
        Ok(())
    }

    fn prepare_remote_channel(&self) -> SupervisorResult<RemoteCommandChannel> {
        let path = self.config.settings_path();
        let mut settings = ServerSettings::load(&path)?;

        if settings.ensure_remote_access() {
            settings.save(&path)?;
            settings = ServerSettings::load(&path)?;
            info!("Updated server settings {}", path.display());
        }

        let port = self.config.remote.port.unwrap_or_else(|| settings.remote_port());
        let endpoint = RemoteEndpoint::new(&self.config.remote.host, port, settings.secret());
        Ok(RemoteCommandChannel::new(Arc::clone(&self.transport), endpoint))
    }

    fn launch_spec(&self) -> LaunchSpec {
        let executable = absolute(&self.config.executable_path());
        LaunchSpec::new(SERVER_ID, executable)
            .args(self.config.server.args.clone())
            .working_dir(absolute(&self.config.server.install_dir))
    }

    /// The remote channel, if it completed a handshake this run.
    fn authenticated_channel(&self) -> Option<Arc<RemoteCommandChannel>> {
        self.channel
            .lock()
            .clone()
            .filter(|channel| channel.is_authenticated())
    }

    fn request_exit(&self, code: i32) {
        info!("Requesting supervisor exit with code {}", code);
        self.exit_request.send_replace(Some(code));
    }

    fn status(&self) -> SupervisorStatus {
        let remote_available = self.authenticated_channel().is_some();
        let st = self.state.lock();

        let uptime = st
            .uptime_since
            .map(|since| since.elapsed())
            .unwrap_or(st.uptime);

        SupervisorStatus {
            phase: st.phase,
            running: st.running,
            pid: st.process.as_ref().and_then(|p| p.pid()),
            uptime_secs: uptime.as_secs(),
            crash_count: st.crash_count,
            last_crash: st.last_crash,
            last_backup: st.last_backup.clone(),
            remote_available,
            server_version: if remote_available {
                st.server_version.clone()
            } else {
                None
            },
            resources: st
                .sampler
                .as_ref()
                .and_then(|s| s.latest())
                .or(st.last_sample),
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
