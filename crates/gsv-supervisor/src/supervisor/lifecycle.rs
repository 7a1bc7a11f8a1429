//! Starting, stopping and exit handling.
//!
//! Everything here runs with the lifecycle lock held by the caller.

use super::{BoxFuture, Inner, RunState};
use crate::error::SupervisorResult;
use crate::status::SupervisorPhase;
use chrono::Local;
use gsv_process_control::{LaunchedProcess, ProcessEvents, ProcessExit, ProcessHandle};
use gsv_remote::{commands, RemoteCommandChannel};
use gsv_resource_monitor::ResourceSampler;
use gsv_task::DEFAULT_DESTROY_GRACE;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

impl Inner {
    /// Launch a new run and connect the remote channel. No-op while running.
    pub(super) async fn start_locked(self: &Arc<Self>) -> SupervisorResult<()> {
        {
            let mut st = self.state.lock();
            if st.running {
                debug!("Server already running");
                return Ok(());
            }
            st.phase = SupervisorPhase::Starting;
        }

        let spec = self.launch_spec();
        info!("Starting server: {}", spec.program.display());

        let LaunchedProcess { handle, events } = match self.launcher.launch(&spec).await {
            Ok(launched) => launched,
            Err(e) => {
                error!("Failed to start server: {}", e);
                self.state.lock().phase = SupervisorPhase::Stopped;
                return Err(e.into());
            }
        };

        let pid = handle.pid();
        let sampler = pid.map(|pid| self.start_sampler(pid));
        let timers = CancellationToken::new();

        let run_id = {
            let mut st = self.state.lock();
            st.run_id += 1;
            st.running = true;
            st.phase = SupervisorPhase::Running;
            st.process = Some(Arc::clone(&handle));
            st.sampler = sampler;
            st.timers = Some(timers.clone());
            st.uptime_since = Some(Instant::now());
            st.uptime = Duration::ZERO;
            st.server_version = None;
            st.last_sample = None;
            st.shutdown_epoch = *self.shutdowns.borrow();
            st.run_id
        };
        info!(run_id, pid = ?pid, "Server started");

        self.spawn_run_tasks(run_id, events);
        self.arm_timers(&timers);

        sleep(self.config.startup_grace).await;
        self.connect_remote().await;
        Ok(())
    }

    fn start_sampler(&self, pid: u32) -> ResourceSampler {
        let sampler = ResourceSampler::for_pid(pid, Arc::clone(&self.probe), self.config.sampler_interval);
        if let Err(e) = sampler.run() {
            warn!("Resource sampler for pid {} not started: {}", pid, e);
        }
        sampler
    }

    /// Forward output to the log and watch for the exit of run `run_id`.
    fn spawn_run_tasks(self: &Arc<Self>, run_id: u64, events: ProcessEvents) {
        let ProcessEvents {
            started,
            mut output,
            mut errors,
            exit,
        } = events;

        tokio::spawn(async move {
            if let Ok(pid) = started.await {
                debug!(run_id, pid = ?pid, "Server process reported start");
            }
        });

        tokio::spawn(async move {
            while let Some(line) = output.recv().await {
                if !line.trim().is_empty() {
                    info!("[server] {}", line);
                }
            }
        });

        tokio::spawn(async move {
            while let Some(line) = errors.recv().await {
                if !line.trim().is_empty() {
                    warn!("[server] {}", line);
                }
            }
        });

        let inner = Arc::downgrade(self);
        let watcher: BoxFuture = Box::pin(async move {
            let exit = match exit.await {
                Ok(exit) => exit,
                Err(_) => {
                    debug!(run_id, "Exit notification dropped");
                    return;
                }
            };
            if let Some(inner) = inner.upgrade() {
                inner.on_exit(run_id, exit).await;
            }
        });
        tokio::spawn(watcher);
    }

    /// Authenticate the remote channel and record the server version.
    ///
    /// Failures only degrade the run: without the channel, shutdown falls back
    /// to a forced stop.
    async fn connect_remote(&self) {
        let channel = match self.channel.lock().clone() {
            Some(channel) => channel,
            None => {
                debug!("No remote channel configured");
                return;
            }
        };

        let remote = &self.config.remote;
        if !channel.connect(remote.connect_attempts, remote.retry_delay).await {
            warn!("Remote channel unavailable, shutdown will force-stop the server");
            return;
        }

        match channel.execute(&commands::info(), false).await {
            Some(response) => match commands::parse_version(&response) {
                Some(version) => {
                    info!("Server version {}", version);
                    self.state.lock().server_version = Some(version);
                }
                None => warn!("Could not parse server version from {:?}", response),
            },
            None => warn!("Server info query failed"),
        }
    }

    /// End the current run.
    fn retire_run(&self, phase: SupervisorPhase) {
        let sampler = {
            let mut st = self.state.lock();
            st.running = false;
            st.phase = phase;
            st.process = None;
            quiesce(&mut st)
        };
        stop_sampler(sampler);
    }

    /// Exit watcher callback for run `run_id`.
    ///
    /// Exits of runs that already ended, or that a shutdown is stopping, are
    /// only logged.
    pub(super) async fn on_exit(self: Arc<Self>, run_id: u64, exit: ProcessExit) {
        let guard = self.lifecycle.lock().await;

        let epoch = {
            let st = self.state.lock();
            if !st.running || st.run_id != run_id {
                info!(run_id, "Server {} after it was stopped", exit);
                return;
            }
            st.shutdown_epoch
        };

        self.retire_run(SupervisorPhase::Stopped);

        match exit {
            ProcessExit::Unexpected { .. } => {
                drop(guard);
                self.recover_from_crash(run_id, epoch, exit).await;
            }
            ProcessExit::Normal if self.config.auto_live => {
                drop(guard);
                info!("Server exited, auto-live restart in {:?}", self.config.restart_delay);
                if self.unless_shutdown(epoch, sleep(self.config.restart_delay)).await.is_none() {
                    info!("Shutdown requested, auto-live restart abandoned");
                    return;
                }
                self.restart_unless_superseded(run_id, epoch).await;
            }
            ProcessExit::Normal => info!("Server exited normally"),
        }
    }

    /// Runs without the lifecycle lock, so an operator shutdown is never
    /// queued behind the restart prompt. Gives up once a shutdown newer
    /// than `epoch` arrives.
    async fn recover_from_crash(self: &Arc<Self>, run_id: u64, epoch: u64, exit: ProcessExit) {
        let crash_count = {
            let mut st = self.state.lock();
            st.crash_count += 1;
            st.last_crash = Some(Local::now());
            st.phase = SupervisorPhase::CrashRecovery;
            st.crash_count
        };
        error!(crash_count, "Server {}", exit);

        let decide = async {
            let restart = if self.config.auto_live {
                info!("Auto-live restart in {:?}", self.config.restart_delay);
                true
            } else {
                self.prompt.confirm_restart().await
            };
            if restart {
                sleep(self.config.restart_delay).await;
            }
            restart
        };

        let Some(restart) = self.unless_shutdown(epoch, decide).await else {
            info!("Shutdown requested, crash recovery abandoned");
            self.settle_recovery();
            return;
        };

        if !restart {
            info!("Restart declined");
            self.settle_recovery();
            sleep(self.config.restart_delay).await;
            self.request_exit(0);
            return;
        }

        self.restart_unless_superseded(run_id, epoch).await;
    }

    /// Drive `work` to completion unless an operator shutdown newer than
    /// `epoch` arrives first.
    async fn unless_shutdown<T>(&self, epoch: u64, work: impl Future<Output = T>) -> Option<T> {
        let mut shutdowns = self.shutdowns.subscribe();
        let shutdown_requested = async move {
            let _ = shutdowns.wait_for(|count| *count != epoch).await;
        };

        tokio::select! {
            value = work => Some(value),
            _ = shutdown_requested => None,
        }
    }

    /// Start a new run in place of `run_id`, unless anything started,
    /// stopped or shut down the server since that run ended.
    async fn restart_unless_superseded(self: &Arc<Self>, run_id: u64, epoch: u64) {
        let _guard = self.lifecycle.lock().await;
        let superseded = {
            let st = self.state.lock();
            st.running || st.run_id != run_id || *self.shutdowns.borrow() != epoch
        };
        if superseded {
            info!("Server state changed while waiting to restart, restart skipped");
            self.settle_recovery();
            return;
        }
        if let Err(e) = self.start_locked().await {
            error!("Restart failed: {}", e);
        }
    }

    /// Leave `CrashRecovery` once no restart will follow.
    fn settle_recovery(&self) {
        let mut st = self.state.lock();
        if st.phase == SupervisorPhase::CrashRecovery {
            st.phase = SupervisorPhase::Stopped;
        }
    }

    /// Stop the current run. No-op unless running.
    ///
    /// The run counts as ended from the first step, so the exit this causes is
    /// never treated as a crash.
    pub(super) async fn shutdown_locked(self: &Arc<Self>) -> SupervisorResult<()> {
        let (process, reboot, sampler) = {
            let mut st = self.state.lock();
            if !st.running {
                debug!("Server is not running, nothing to shut down");
                return Ok(());
            }
            st.phase = SupervisorPhase::Stopping;
            // Exits observed from here on belong to this shutdown
            st.running = false;
            let sampler = quiesce(&mut st);
            (st.process.clone(), st.reboot_in_progress, sampler)
        };
        stop_sampler(sampler);
        info!(reboot, "Shutting down server");

        if self.config.backup_on_shutdown {
            self.backup().await;
        }

        let result = match process {
            Some(process) => match self.authenticated_channel() {
                Some(channel) => self.graceful_stop(&channel, process.as_ref(), reboot).await,
                None => self.forced_stop(process.as_ref()).await,
            },
            None => Ok(()),
        };

        self.retire_run(SupervisorPhase::Stopped);
        info!("Server stopped");
        result
    }

    /// Announce a countdown over the remote channel and wait for the server
    /// to leave on its own, killing it only as a last resort.
    async fn graceful_stop(
        &self,
        channel: &RemoteCommandChannel,
        process: &dyn ProcessHandle,
        reboot: bool,
    ) -> SupervisorResult<()> {
        let wait = self.config.shutdown.wait.as_secs();
        let action = if reboot { "reboot" } else { "shut down" };

        let notice = format!("Server will {} in {} seconds", action, wait);
        if channel.execute(&commands::shutdown(wait, &notice), false).await.is_none() {
            warn!("Remote shutdown command failed, forcing stop");
            return self.forced_stop(process).await;
        }

        for remaining in (1..=wait).rev() {
            let message = format!("Server will {} in {} seconds", action, remaining);
            channel.execute(&commands::broadcast(&message), false).await;
            if process.wait_exit(COUNTDOWN_STEP).await.is_some() {
                info!("Server exited with {}s of countdown left", remaining - 1);
                return Ok(());
            }
        }

        let grace = self.config.shutdown.exit_grace;
        if process.wait_exit(grace).await.is_some() {
            return Ok(());
        }
        warn!("Server still running {:?} after the countdown, forcing stop", grace);
        self.forced_stop(process).await
    }

    async fn forced_stop(&self, process: &dyn ProcessHandle) -> SupervisorResult<()> {
        let timeout = self.config.shutdown.forced_stop_timeout;
        info!("Stopping server process (timeout {:?})", timeout);
        process.request_stop(None, timeout).await.map_err(|e| {
            error!("Failed to stop server: {}", e);
            e.into()
        })
    }
}

/// Cancel the run's timers, freeze its uptime and detach its sampler.
fn quiesce(st: &mut RunState) -> Option<ResourceSampler> {
    if let Some(timers) = st.timers.take() {
        timers.cancel();
    }
    if let Some(since) = st.uptime_since.take() {
        st.uptime = since.elapsed();
    }
    let sampler = st.sampler.take();
    if let Some(ref s) = sampler {
        st.last_sample = s.latest().or(st.last_sample);
    }
    sampler
}

fn stop_sampler(sampler: Option<ResourceSampler>) {
    if let Some(sampler) = sampler {
        sampler.pause();
        sampler.destroy(DEFAULT_DESTROY_GRACE);
    }
}
