//! Composable actions.
//!
//! An [`Action`] is a cheaply clonable handle to a closure. Chains compare
//! actions by identity, so the handle returned when adding an action is the
//! key used to remove it again.

use crate::error::TaskError;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Outcome of a single action invocation.
pub type ActionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type ActionFn = dyn Fn() -> ActionResult + Send + Sync;

/// Which chain an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    /// Runs once on the first start.
    Initial,
    /// Runs on every tick.
    Tick,
    /// Runs once on destroy.
    Final,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Initial => write!(f, "initial"),
            ChainKind::Tick => write!(f, "tick"),
            ChainKind::Final => write!(f, "final"),
        }
    }
}

/// A unit of work an engine chain can run.
///
/// Clones share identity: a clone removes the original from a chain.
/// A panic inside the closure is caught and reported as
/// [`TaskError::ActionPanicked`].
#[derive(Clone)]
pub struct Action {
    func: Arc<ActionFn>,
}

impl Action {
    /// Wrap a fallible closure.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        Self { func: Arc::new(func) }
    }

    /// Wrap a closure that cannot fail.
    pub fn infallible<F>(func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(move || {
            func();
            Ok(())
        })
    }

    pub(crate) fn invoke(&self, engine: &str, chain: ChainKind) -> Result<(), TaskError> {
        match catch_unwind(AssertUnwindSafe(|| (self.func)())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TaskError::ActionFailed {
                engine: engine.to_string(),
                chain,
                reason: e.to_string(),
            }),
            Err(payload) => Err(TaskError::ActionPanicked {
                engine: engine.to_string(),
                chain,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.func) as *const (),
            Arc::as_ptr(&other.func) as *const (),
        )
    }
}

impl Eq for Action {}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("ptr", &(Arc::as_ptr(&self.func) as *const ()))
            .finish()
    }
}

/// Run a chain in order, stopping at the first failing member.
pub(crate) fn run_chain(actions: &[Action], engine: &str, chain: ChainKind) -> Result<(), TaskError> {
    for action in actions {
        action.invoke(engine, chain)?;
    }
    Ok(())
}

/// Remove the most recently added occurrence of `action`.
pub(crate) fn remove_from_chain(actions: &mut Vec<Action>, action: &Action) -> bool {
    match actions.iter().rposition(|a| a == action) {
        Some(index) => {
            actions.remove(index);
            true
        }
        None => false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
