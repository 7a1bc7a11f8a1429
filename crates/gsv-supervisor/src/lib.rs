//! # GSV Supervisor
//!
//! Keeps a dedicated game server alive.
//!
//! The [`ServerSupervisor`] launches the server, restarts it after crashes
//! (automatically or after asking the operator), reboots it on a schedule,
//! archives its save data and shuts it down gracefully through the remote
//! console when one is reachable.
//!
//! ## Phases
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!                          |
//!                          +-> CrashRecovery -> Starting | Stopped
//! ```
//!
//! An exit counts as a crash when the exit code is non-zero or the process
//! was killed, and no stop had been requested. With `auto_live` every exit
//! is followed by a restart after `restart_delay`; without it a normal exit
//! leaves the server stopped and a crash asks the [`OperatorPrompt`]. A
//! declined restart asks the host program to exit, see
//! [`ServerSupervisor::wait_for_exit_request`].
//!
//! ## Collaborators
//!
//! | Seam | Production | Purpose |
//! |------|------------|---------|
//! | `ProcessLauncher` | `SystemLauncher` | spawn the server |
//! | `ProcessProbe` | `SysinfoProbe` | CPU and memory counters |
//! | `RemoteTransport` | `UnavailableTransport` | administrative sessions |
//! | [`OperatorPrompt`] | [`StdinPrompt`] | restart after a crash? |
//! | [`Installer`] | [`MissingBinaryInstaller`] | provision the binary |
//!
//! Each is swapped through [`SupervisorBuilder`].
//!
//! ```no_run
//! use gsv_supervisor::{ServerSupervisor, SupervisorConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SupervisorConfig::load_from_file("config/supervisor.yaml")?;
//! let supervisor = ServerSupervisor::builder(config).build()?;
//! supervisor.initialize().await?;
//!
//! let code = supervisor.wait_for_exit_request().await;
//! std::process::exit(code);
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod error;
pub mod installer;
pub mod prompt;
pub mod settings;
pub mod status;
mod supervisor;

pub use config::{RemoteConfig, ServerConfig, ShutdownConfig, SupervisorConfig};
pub use error::{SupervisorError, SupervisorResult};
pub use installer::{Installer, MissingBinaryInstaller};
pub use prompt::{AlwaysRestart, NeverRestart, OperatorPrompt, StdinPrompt};
pub use settings::ServerSettings;
pub use status::{SupervisorPhase, SupervisorStatus};
pub use supervisor::{ServerSupervisor, SupervisorBuilder};
