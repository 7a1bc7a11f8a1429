//! Save-data backups.
//!
//! Backups are serialized on their own lock, separate from the lifecycle
//! lock, so a timer backup can run while the server is being started.
//! Failures are logged and reported as `None`; they never stop the run.

use super::Inner;
use crate::backup;
use crate::error::{SupervisorError, SupervisorResult};
use chrono::Local;
use gsv_remote::commands;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Fallback save command written to the server console.
const CONSOLE_SAVE_COMMAND: &str = "save";

impl Inner {
    /// Flush and archive the save data. Backups never overlap.
    pub(super) async fn backup(&self) -> Option<PathBuf> {
        let _guard = self.backup_lock.lock().await;
        info!("Starting backup");

        match self.run_backup().await {
            Ok(path) => {
                info!("Backup written to {}", path.display());
                self.state.lock().last_backup = Some(path.clone());
                self.backups.send_replace(Some(path.clone()));
                Some(path)
            }
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }

    /// Ask the server to flush, then zip the save directory.
    ///
    /// A remote save is preferred. Without an authenticated channel the
    /// console command is written to stdin instead, and a failed flush only
    /// means the archive may miss the last few minutes of play. The archive
    /// itself runs on the blocking pool.
    async fn run_backup(&self) -> SupervisorResult<PathBuf> {
        let dest = self.config.backup_dir.clone();
        tokio::fs::create_dir_all(&dest).await?;

        match self.authenticated_channel() {
            Some(channel) => {
                if channel.execute(&commands::save(), false).await.is_none() {
                    warn!("Remote save failed, archiving the files on disk");
                }
            }
            None => {
                let process = self.state.lock().process.clone();
                if let Some(process) = process {
                    if let Err(e) = process.send(CONSOLE_SAVE_COMMAND).await {
                        debug!("Console save not delivered: {}", e);
                    }
                }
            }
        }

        let source = self.config.save_path();
        let at = Local::now();
        let path = tokio::task::spawn_blocking(move || backup::archive_dir(&source, &dest, at))
            .await
            .map_err(|e| SupervisorError::backup(format!("archive task failed: {}", e)))??;

        if let Some(channel) = self.authenticated_channel() {
            channel.execute(&commands::broadcast("Backup completed"), false).await;
        }
        Ok(path)
    }
}
