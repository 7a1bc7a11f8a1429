//! Production [`ProcessLauncher`].

use crate::controller::ProcessController;
use crate::traits::{LaunchSpec, LaunchedProcess, ProcessLauncher};
use async_trait::async_trait;
use gsv_common::ProcessResult;
use std::sync::Arc;

/// Launches real OS processes, one [`ProcessController`] per launch.
#[derive(Debug, Default, Clone)]
pub struct SystemLauncher;

impl SystemLauncher {
    /// Create a launcher. It holds no state.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> ProcessResult<LaunchedProcess> {
        let controller = Arc::new(ProcessController::new(spec.id.clone()));
        let events = controller.start(spec)?;
        Ok(LaunchedProcess {
            handle: controller,
            events,
        })
    }
}
