//! # GSV Task
//!
//! A cooperative periodic task engine.
//!
//! An engine owns three action chains:
//! - **initial** actions run once, the first time the engine starts
//! - **tick** actions run on every interval while the engine is running
//! - **final** actions run once when the engine is destroyed
//!
//! Failures inside a chain are contained: the failing tick is abandoned,
//! the error goes to the log and the optional error sink, and the engine
//! keeps ticking.

pub mod action;
pub mod engine;
pub mod error;
pub mod state;

pub use action::{Action, ActionResult, ChainKind};
pub use engine::{ErrorSink, PeriodicTaskEngine, DEFAULT_DESTROY_GRACE, DEFAULT_INTERVAL};
pub use error::{TaskError, TaskResult};
pub use state::TaskState;
