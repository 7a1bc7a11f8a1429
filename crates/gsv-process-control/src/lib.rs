//! # GSV Process Control
//!
//! Owns the supervised OS process for exactly one run.
//!
//! A [`ProcessController`] spawns the child with piped stdio, pumps its stdout
//! and stderr line by line into channels and reports exactly one
//! [`ProcessExit`] when the child terminates. Controllers are single-use; a
//! restart goes through a fresh [`ProcessLauncher::launch`].
//!
//! The [`ProcessLauncher`] and [`ProcessHandle`] traits are the seam the
//! supervisor depends on, so scenarios can run against scripted fakes.

pub mod controller;
pub mod events;
pub mod launcher;
pub mod traits;

pub use controller::{ControllerState, ProcessController, FORCE_KILL_TIMEOUT};
pub use events::{EventSenders, ProcessEvents, ProcessExit};
pub use launcher::SystemLauncher;
pub use traits::{LaunchSpec, LaunchedProcess, ProcessHandle, ProcessLauncher};
