//! Supervisor configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty document is a
//! valid configuration. Durations are written as `250ms`, `30s`, `5m` or
//! `6h`; a zero interval disables the corresponding timer.
//!
//! ```yaml
//! server:
//!   install_dir: PalServer
//! auto_live: true
//! reboot_interval: 6h
//! backup_interval: 30m
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validation;

/// Top-level supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Install location and launch arguments.
    #[serde(default)]
    pub server: ServerConfig,

    /// Restart the server after every exit, without asking.
    #[serde(default)]
    pub auto_live: bool,

    /// Reboot the server this often. Zero disables.
    #[serde(default = "default_zero", with = "duration_serde")]
    pub reboot_interval: Duration,

    /// Back up save data this often. Zero disables.
    #[serde(default = "default_zero", with = "duration_serde")]
    pub backup_interval: Duration,

    /// Take a backup before every shutdown, scheduled reboots included.
    #[serde(default)]
    pub backup_on_shutdown: bool,

    /// Directory that receives the timestamped archives.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Remote administrative channel.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Shutdown timings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Delay between spawning the server and the first remote connect.
    #[serde(default = "default_startup_grace", with = "duration_serde")]
    pub startup_grace: Duration,

    /// Delay before an automatic restart.
    #[serde(default = "default_restart_delay", with = "duration_serde")]
    pub restart_delay: Duration,

    /// Resource sampling interval.
    #[serde(default = "default_sampler_interval", with = "duration_serde")]
    pub sampler_interval: Duration,

    /// Log a status line this often. Zero disables.
    #[serde(default = "default_status_interval", with = "duration_serde")]
    pub status_interval: Duration,

    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where the server lives and how it is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server installation root, created on startup.
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// Relative to `install_dir`.
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Arguments passed to the server binary.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Save-data directory, relative to `install_dir`.
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,

    /// The server's own settings file, relative to `install_dir`.
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,
}

/// Connection settings for the remote administrative channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Host the server's console listens on.
    #[serde(default = "default_remote_host")]
    pub host: String,

    /// Overrides the port from the server settings file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Handshake attempts after every start.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Pause between handshake attempts.
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,
}

/// How the server is brought down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Length of the graceful countdown announced to players.
    #[serde(default = "default_shutdown_wait", with = "duration_serde")]
    pub wait: Duration,

    /// Wait before killing when no remote channel is available.
    #[serde(default = "default_forced_stop_timeout", with = "duration_serde")]
    pub forced_stop_timeout: Duration,

    /// How long the server may take to exit once the countdown is over.
    #[serde(default = "default_exit_grace", with = "duration_serde")]
    pub exit_grace: Duration,
}

impl SupervisorConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: SupervisorConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges. Called by the loaders and by
    /// [`SupervisorBuilder::build`](crate::SupervisorBuilder::build).
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Server binary inside the install directory.
    pub fn executable_path(&self) -> PathBuf {
        self.server.install_dir.join(&self.server.executable)
    }

    /// Save-data directory that backups archive.
    pub fn save_path(&self) -> PathBuf {
        self.server.install_dir.join(&self.server.save_dir)
    }

    /// The server's settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.server.install_dir.join(&self.server.settings_file)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auto_live: false,
            reboot_interval: default_zero(),
            backup_interval: default_zero(),
            backup_on_shutdown: false,
            backup_dir: default_backup_dir(),
            remote: RemoteConfig::default(),
            shutdown: ShutdownConfig::default(),
            startup_grace: default_startup_grace(),
            restart_delay: default_restart_delay(),
            sampler_interval: default_sampler_interval(),
            status_interval: default_status_interval(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            executable: default_executable(),
            args: default_args(),
            save_dir: default_save_dir(),
            settings_file: default_settings_file(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            port: None,
            connect_attempts: default_connect_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            wait: default_shutdown_wait(),
            forced_stop_timeout: default_forced_stop_timeout(),
            exit_grace: default_exit_grace(),
        }
    }
}

// Default value functions
fn default_zero() -> Duration {
    Duration::ZERO
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("BackupSaved")
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("PalServer")
}

fn default_executable() -> PathBuf {
    PathBuf::from("Pal/Binaries/Win64/PalServer-Win64-Test-Cmd.exe")
}

fn default_args() -> Vec<String> {
    vec![
        "-useperfthreads".to_string(),
        "-NoAsyncLoadingThread".to_string(),
        "-UseMultithreadForDS".to_string(),
    ]
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("Pal/Saved")
}

fn default_settings_file() -> PathBuf {
    PathBuf::from("Pal/Saved/Config/WindowsServer/PalWorldSettings.ini")
}

fn default_remote_host() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_attempts() -> u32 {
    gsv_remote::DEFAULT_CONNECT_ATTEMPTS
}

fn default_retry_delay() -> Duration {
    gsv_remote::DEFAULT_RETRY_DELAY
}

fn default_shutdown_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_forced_stop_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_exit_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_startup_grace() -> Duration {
    Duration::from_secs(1)
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_sampler_interval() -> Duration {
    gsv_resource_monitor::DEFAULT_SAMPLE_INTERVAL
}

fn default_status_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `"500ms"`, `"30s"`, `"5m"` or `"6h"`.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `<n>ms`, `<n>s`, `<n>m` or `<n>h`.
    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let number = |suffix_len: usize| -> Result<u64, String> {
            s[..s.len() - suffix_len]
                .trim()
                .parse()
                .map_err(|_| format!("Invalid duration: {}", s))
        };

        let scaled = |factor: u64| -> Result<Duration, String> {
            number(1)?
                .checked_mul(factor)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("Duration out of range: {}", s))
        };

        // Check for "ms" BEFORE "s" since "ms" ends with 's'
        if s.ends_with("ms") {
            Ok(Duration::from_millis(number(2)?))
        } else if s.ends_with('s') {
            scaled(1)
        } else if s.ends_with('m') {
            scaled(60)
        } else if s.ends_with('h') {
            scaled(3600)
        } else {
            Err(format!("Duration must end with 'ms', 's', 'm' or 'h': {}", s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_yields_defaults() {
        let config = SupervisorConfig::load_from_string("{}").unwrap();

        assert_eq!(config.server.install_dir, PathBuf::from("PalServer"));
        assert_eq!(config.server.args.len(), 3);
        assert!(!config.auto_live);
        assert_eq!(config.reboot_interval, Duration::ZERO);
        assert_eq!(config.backup_dir, PathBuf::from("BackupSaved"));
        assert_eq!(config.remote.connect_attempts, 5);
        assert_eq!(config.remote.retry_delay, Duration::from_secs(3));
        assert_eq!(config.shutdown.wait, Duration::from_secs(30));
        assert_eq!(config.startup_grace, Duration::from_secs(1));
        assert_eq!(config.sampler_interval, Duration::from_millis(1000));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
server:
  install_dir: "/srv/palworld"
  executable: "PalServer.sh"
  args: ["-port=8211"]
auto_live: true
reboot_interval: "6h"
backup_interval: "30m"
backup_on_shutdown: true
backup_dir: "/srv/backups"
remote:
  port: 25576
  connect_attempts: 3
  retry_delay: "500ms"
shutdown:
  wait: "10s"
status_interval: "0s"
log_level: "debug"
"#;
        let config = SupervisorConfig::load_from_string(yaml).unwrap();

        assert!(config.auto_live);
        assert_eq!(config.reboot_interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.backup_interval, Duration::from_secs(1800));
        assert_eq!(config.remote.port, Some(25576));
        assert_eq!(config.remote.retry_delay, Duration::from_millis(500));
        assert_eq!(config.shutdown.wait, Duration::from_secs(10));
        assert_eq!(config.shutdown.exit_grace, Duration::from_secs(30));
        assert_eq!(config.status_interval, Duration::ZERO);
        assert_eq!(
            config.executable_path(),
            PathBuf::from("/srv/palworld/PalServer.sh")
        );
        assert_eq!(config.save_path(), PathBuf::from("/srv/palworld/Pal/Saved"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "auto_live: true").unwrap();

        let config = SupervisorConfig::load_from_file(file.path()).unwrap();
        assert!(config.auto_live);
    }

    #[test]
    fn test_shipped_config_parses() {
        let config =
            SupervisorConfig::load_from_string(include_str!("../../../../config/supervisor.yaml")).unwrap();
        assert_eq!(config.reboot_interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.backup_interval, Duration::from_secs(30 * 60));
        assert!(config.backup_on_shutdown);
        assert_eq!(config.remote.port, None);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = SupervisorConfig::load_from_file("/no/such/supervisor.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let err = SupervisorConfig::load_from_string("reboot_interval: \"soon\"").unwrap_err();
        assert!(format!("{:#}", err).contains("Duration must end with"));
    }

    #[test]
    fn test_parse_duration_units() {
        use duration_serde::parse_duration;
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("12").is_err());
        assert!(parse_duration("18446744073709551615h").is_err());
        assert!(parse_duration("307445734561825861m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_durations_round_trip_through_yaml() {
        let mut config = SupervisorConfig::default();
        config.sampler_interval = Duration::from_millis(1500);
        config.backup_interval = Duration::from_secs(600);

        let yaml = serde_yaml::to_string(&config).unwrap();
        let back = SupervisorConfig::load_from_string(&yaml).unwrap();
        assert_eq!(back.sampler_interval, Duration::from_millis(1500));
        assert_eq!(back.backup_interval, Duration::from_secs(600));
    }
}
