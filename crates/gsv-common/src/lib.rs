//! # GSV Common
//!
//! Common types and error definitions shared across the game server
//! supervisor crates.
//!
//! Every other crate in the workspace builds on the error enums defined
//! here, so process-level failures read the same whether they come from
//! the controller, the sampler or the supervisor itself.

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{Error, Result, ProcessError, ProcessResult};
pub use types::ServerVersion;
