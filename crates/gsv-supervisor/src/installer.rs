//! Server installation seam.

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use async_trait::async_trait;

/// Puts the server binary in place when it is missing.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install the server so that `config.executable_path()` exists afterwards.
    async fn install(&self, config: &SupervisorConfig) -> SupervisorResult<()>;
}

/// Installer for deployments where the server is provisioned out of band.
#[derive(Debug, Default, Clone)]
pub struct MissingBinaryInstaller;

#[async_trait]
impl Installer for MissingBinaryInstaller {
    async fn install(&self, config: &SupervisorConfig) -> SupervisorResult<()> {
        Err(SupervisorError::setup(format!(
            "server binary {} is missing and no installer is configured",
            config.executable_path().display()
        )))
    }
}
