//! # GSV Process
//!
//! Low-level, pid-based process operations:
//! - Process existence verification
//! - Forced process termination
//!
//! Higher layers own the child handle; these helpers only need a pid so
//! they can be used after the handle has been moved into a monitor task.

pub mod check;
pub mod terminate;

// Re-export main functions
pub use check::process_exists;
pub use terminate::force_kill;
