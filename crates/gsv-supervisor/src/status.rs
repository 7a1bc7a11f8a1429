//! Point-in-time supervisor status.

use chrono::{DateTime, Local};
use gsv_common::ServerVersion;
use gsv_resource_monitor::{format_bytes, ResourceSample};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Coarse lifecycle phase of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPhase {
    /// No server process, nothing pending.
    Stopped,
    /// Launching the process and connecting the remote channel.
    Starting,
    /// The server process is alive.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// The server crashed and a restart decision is pending.
    CrashRecovery,
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorPhase::Stopped => write!(f, "stopped"),
            SupervisorPhase::Starting => write!(f, "starting"),
            SupervisorPhase::Running => write!(f, "running"),
            SupervisorPhase::Stopping => write!(f, "stopping"),
            SupervisorPhase::CrashRecovery => write!(f, "crash-recovery"),
        }
    }
}

/// Snapshot reported by [`ServerSupervisor::status`](crate::ServerSupervisor::status).
///
/// `Display` renders the single log line used by status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    /// Current phase.
    pub phase: SupervisorPhase,
    /// Whether a server run is active.
    pub running: bool,
    /// Pid of the current run.
    pub pid: Option<u32>,
    /// Seconds since the current run started, frozen once it ends.
    pub uptime_secs: u64,
    /// Unexpected exits since the supervisor was built.
    pub crash_count: u32,
    /// Local time of the latest crash.
    pub last_crash: Option<DateTime<Local>>,
    /// Archive written by the latest successful backup.
    pub last_backup: Option<PathBuf>,
    /// Whether the remote channel authenticated this run.
    pub remote_available: bool,
    /// Only reported while the remote channel is up.
    pub server_version: Option<ServerVersion>,
    /// Latest CPU and memory sample.
    pub resources: Option<ResourceSample>,
}

impl fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase={}", self.phase)?;
        if let Some(pid) = self.pid {
            write!(f, " pid={}", pid)?;
        }
        write!(
            f,
            " uptime={} crashes={}",
            format_uptime(Duration::from_secs(self.uptime_secs)),
            self.crash_count
        )?;
        if let Some(sample) = self.resources {
            write!(
                f,
                " cpu={:.2}% memory={}",
                sample.cpu_percent,
                format_bytes(sample.memory_bytes)
            )?;
        }
        write!(f, " remote={}", if self.remote_available { "up" } else { "down" })?;
        if let Some(ref version) = self.server_version {
            write!(f, " version={}", version)?;
        }
        if let Some(ref crash) = self.last_crash {
            write!(f, " last_crash={}", crash.format("%Y-%m-%d %H:%M:%S"))?;
        }
        if let Some(ref backup) = self.last_backup {
            write!(f, " last_backup={}", backup.display())?;
        }
        Ok(())
    }
}

/// `1d02h03m04s`, leading zero units omitted.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, minutes, seconds) = (secs / 86400, secs / 3600 % 24, secs / 60 % 60, secs % 60);
    if days > 0 {
        format!("{}d{:02}h{:02}m{:02}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h{:02}m{:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(5)), "5s");
        assert_eq!(format_uptime(Duration::from_secs(65)), "1m05s");
        assert_eq!(format_uptime(Duration::from_secs(3723)), "1h02m03s");
        assert_eq!(format_uptime(Duration::from_secs(93784)), "1d02h03m04s");
    }

    #[test]
    fn test_status_line() {
        let status = SupervisorStatus {
            phase: SupervisorPhase::Running,
            running: true,
            pid: Some(42),
            uptime_secs: 65,
            crash_count: 1,
            last_crash: None,
            last_backup: None,
            remote_available: true,
            server_version: Some(ServerVersion::new(vec![0, 1, 5, 1])),
            resources: Some(ResourceSample {
                cpu_percent: 12.5,
                memory_bytes: 1536 * 1024 * 1024,
            }),
        };

        assert_eq!(
            status.to_string(),
            "phase=running pid=42 uptime=1m05s crashes=1 cpu=12.50% memory=1.50 GB remote=up version=v0.1.5.1"
        );
    }
}
