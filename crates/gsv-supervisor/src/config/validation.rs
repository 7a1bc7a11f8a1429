//! Semantic checks run after the YAML has been deserialized.
//!
//! Parsing only guarantees shape. These rules reject values that
//! deserialize fine but make no sense at runtime, such as zero connect
//! attempts or an unknown log level.

use super::*;
use anyhow::{anyhow, Result};

/// Upper bound on the countdown before a planned shutdown.
const MAX_SHUTDOWN_WAIT: Duration = Duration::from_secs(3600);

/// Validate the complete configuration
pub fn validate_config(config: &SupervisorConfig) -> Result<()> {
    validate_server(&config.server)?;
    validate_remote(&config.remote)?;
    validate_shutdown(&config.shutdown)?;

    if config.sampler_interval.is_zero() {
        return Err(anyhow!("Sampler interval must be greater than 0"));
    }

    match config.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(anyhow!(
            "Invalid log level: {}, must be one of: trace, debug, info, warn, error",
            config.log_level
        )),
    }
}

/// Both the executable and the install directory are required.
fn validate_server(server: &ServerConfig) -> Result<()> {
    if server.executable.as_os_str().is_empty() {
        return Err(anyhow!("Server executable must not be empty"));
    }
    if server.install_dir.as_os_str().is_empty() {
        return Err(anyhow!("Server install directory must not be empty"));
    }
    Ok(())
}

/// `port: None` means "read it from the server settings", so only zero
/// is rejected.
fn validate_remote(remote: &RemoteConfig) -> Result<()> {
    if remote.connect_attempts == 0 {
        return Err(anyhow!("Remote connect attempts must be at least 1"));
    }
    if remote.port == Some(0) {
        return Err(anyhow!("Remote port must be between 1 and 65535"));
    }
    Ok(())
}

fn validate_shutdown(shutdown: &ShutdownConfig) -> Result<()> {
    if shutdown.wait > MAX_SHUTDOWN_WAIT {
        return Err(anyhow!(
            "Shutdown wait must not exceed {:?}, got: {:?}",
            MAX_SHUTDOWN_WAIT,
            shutdown.wait
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&SupervisorConfig::default()).is_ok());
    }

    #[test]
    fn test_empty_executable_rejected() {
        let mut config = SupervisorConfig::default();
        config.server.executable = PathBuf::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_sampler_interval_rejected() {
        let mut config = SupervisorConfig::default();
        config.sampler_interval = Duration::ZERO;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Sampler interval"));
    }

    #[test]
    fn test_zero_connect_attempts_rejected() {
        let mut config = SupervisorConfig::default();
        config.remote.connect_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_excessive_shutdown_wait_rejected() {
        let mut config = SupervisorConfig::default();
        config.shutdown.wait = Duration::from_secs(7200);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let mut config = SupervisorConfig::default();
        config.log_level = "verbose".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }
}
