//! Reboot, backup and status timers.
//!
//! Reboot and backup timers belong to one run. They hold a weak reference
//! to the supervisor and a clone of the run's cancellation token, so they
//! die with the run and never keep the supervisor alive. The status
//! reporter belongs to the supervisor itself and outlives runs.

use super::{BoxFuture, Inner};
use gsv_task::{Action, PeriodicTaskEngine};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

impl Inner {
    /// Arm the per-run timers. They stop when `token` is cancelled, which
    /// happens whenever the run ends.
    pub(super) fn arm_timers(self: &Arc<Self>, token: &CancellationToken) {
        let reboot_every = self.config.reboot_interval;
        if !reboot_every.is_zero() {
            info!("Scheduled reboot in {:?}", reboot_every);
            let inner = Arc::downgrade(self);
            let token = token.clone();
            let task: BoxFuture = Box::pin(async move {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = sleep(reboot_every) => {}
                }
                if let Some(inner) = inner.upgrade() {
                    inner.scheduled_reboot(&token).await;
                }
            });
            tokio::spawn(task);
        }

        let backup_every = self.config.backup_interval;
        if !backup_every.is_zero() {
            info!("Backing up every {:?}", backup_every);
            let inner = Arc::downgrade(self);
            let token = token.clone();
            let task: BoxFuture = Box::pin(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = sleep(backup_every) => {}
                    }
                    match inner.upgrade() {
                        Some(inner) => {
                            inner.backup().await;
                        }
                        None => break,
                    }
                }
            });
            tokio::spawn(task);
        }
    }

    /// Stop and start the server without counting it as a crash.
    ///
    /// The exit produced by the stop belongs to the retired run and is
    /// ignored, so no crash handling or auto-live restart follows it.
    async fn scheduled_reboot(self: Arc<Self>, token: &CancellationToken) {
        let _guard = self.lifecycle.lock().await;
        if token.is_cancelled() {
            // The run ended while the lock was contended.
            return;
        }
        info!("Scheduled reboot");

        self.state.lock().reboot_in_progress = true;
        if let Err(e) = self.shutdown_locked().await {
            warn!("Scheduled reboot: {}", e);
        }
        if let Err(e) = self.start_locked().await {
            error!("Scheduled reboot could not start the server: {}", e);
        }
        self.state.lock().reboot_in_progress = false;
    }

    /// Log a status line every `status_interval` for the supervisor's lifetime.
    pub(super) fn start_status_reporting(self: &Arc<Self>) {
        let interval = self.config.status_interval;
        if interval.is_zero() {
            return;
        }

        let engine = PeriodicTaskEngine::new("status", interval);
        let inner = Arc::downgrade(self);
        engine.add_task(Action::infallible(move || {
            if let Some(inner) = inner.upgrade() {
                info!("Status: {}", inner.status());
            }
        }));

        if let Err(e) = engine.start() {
            warn!("Status reporting not started: {}", e);
            return;
        }
        if let Some(previous) = self.status_engine.lock().replace(engine) {
            previous.destroy(std::time::Duration::ZERO);
        }
    }
}
