//! Periodic task engine.
//!
//! A [`PeriodicTaskEngine`] owns three ordered chains of [`Action`]s:
//!
//! | Chain | Runs |
//! |-------|------|
//! | initial | once, synchronously, on the first `start()` |
//! | tick | every interval while `Running` |
//! | final | once, when `destroy()` completes |
//!
//! Within a chain the first failing action halts the rest of that chain
//! for the current run; later ticks start from the top again. Failures are
//! logged at `error` and handed to the optional [`ErrorSink`].
//!
//! ## States
//!
//! `Initialized -> Running <-> Paused -> Destroying -> Destroyed`
//!
//! A single driver task per engine sleeps until the next deadline and is
//! woken through a [`Notify`] whenever a control call changes the plan.

use crate::action::{remove_from_chain, run_chain, Action, ChainKind};
use crate::error::{TaskError, TaskResult};
use crate::state::TaskState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, trace};

/// Tick spacing used when none is given.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// How long a running engine lingers in `Destroying` before the final chain runs.
pub const DEFAULT_DESTROY_GRACE: Duration = Duration::from_millis(2000);

/// Receives every chain failure, in addition to the error log.
pub type ErrorSink = Arc<dyn Fn(&TaskError) + Send + Sync>;

/// Runs a chain of actions on a fixed interval.
///
/// Actions run on the tokio runtime that was current when [`start`](Self::start)
/// was first called. Actions must not call back into the engine that runs them.
///
/// # Example
/// ```
/// use gsv_task::{Action, PeriodicTaskEngine, TaskState};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let ticks = Arc::new(AtomicU32::new(0));
/// let engine = PeriodicTaskEngine::new("heartbeat", Duration::from_millis(10));
///
/// let counter = Arc::clone(&ticks);
/// engine.add_task(Action::infallible(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
///
/// engine.start().unwrap();
/// tokio::time::sleep(Duration::from_millis(35)).await;
/// engine.destroy(Duration::ZERO);
/// engine.wait_destroyed().await;
///
/// assert!(ticks.load(Ordering::SeqCst) >= 1);
/// assert_eq!(engine.state(), TaskState::Destroyed);
/// # }
/// ```
pub struct PeriodicTaskEngine {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    core: Mutex<Core>,
    wake: Notify,
    state_tx: watch::Sender<TaskState>,
}

struct Core {
    state: TaskState,
    interval: Duration,
    initial: Vec<Action>,
    tick: Vec<Action>,
    finalizers: Vec<Action>,
    error_sink: Option<ErrorSink>,
    initial_ran: bool,
    fire_now: bool,
    destroy_at: Option<Instant>,
    ticks: u64,
    driver: Option<JoinHandle<()>>,
}

enum Plan {
    Wait,
    TickAt(Instant),
    FinalizeAt(Instant),
}

impl PeriodicTaskEngine {
    /// Create an idle engine named `name` that ticks every `interval` once started.
    ///
    /// The name shows up in every log line and error the engine produces.
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        let (state_tx, _) = watch::channel(TaskState::Initialized);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                core: Mutex::new(Core {
                    state: TaskState::Initialized,
                    interval,
                    initial: Vec::new(),
                    tick: Vec::new(),
                    finalizers: Vec::new(),
                    error_sink: None,
                    initial_ran: false,
                    fire_now: false,
                    destroy_at: None,
                    ticks: 0,
                    driver: None,
                }),
                wake: Notify::new(),
                state_tx,
            }),
        }
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.shared.core.lock().state
    }

    /// Current tick spacing.
    pub fn interval(&self) -> Duration {
        self.shared.core.lock().interval
    }

    /// Number of tick chains started so far.
    pub fn tick_count(&self) -> u64 {
        self.shared.core.lock().ticks
    }

    /// Receiver that sees every state transition.
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.shared.state_tx.subscribe()
    }

    /// Change the tick spacing. A tick that is already scheduled keeps its deadline.
    pub fn set_interval(&self, interval: Duration) {
        self.shared.core.lock().interval = interval;
    }

    /// Route chain failures to `sink` as well as the log. Replaces any earlier sink.
    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.shared.core.lock().error_sink = Some(sink);
    }

    /// Append to the chain that runs once, on the first [`start`](Self::start).
    pub fn add_initial_task(&self, action: Action) {
        self.shared.core.lock().initial.push(action);
    }

    /// Remove `action` from the initial chain. Returns whether it was present.
    pub fn remove_initial_task(&self, action: &Action) -> bool {
        remove_from_chain(&mut self.shared.core.lock().initial, action)
    }

    /// Append to the chain that runs on every tick.
    pub fn add_task(&self, action: Action) {
        self.shared.core.lock().tick.push(action);
    }

    /// Remove `action` from the tick chain. Returns whether it was present.
    pub fn remove_task(&self, action: &Action) -> bool {
        remove_from_chain(&mut self.shared.core.lock().tick, action)
    }

    /// Append to the chain that runs once, when the engine is destroyed.
    pub fn add_final_task(&self, action: Action) {
        self.shared.core.lock().finalizers.push(action);
    }

    /// Remove `action` from the final chain. Returns whether it was present.
    pub fn remove_final_task(&self, action: &Action) -> bool {
        remove_from_chain(&mut self.shared.core.lock().finalizers, action)
    }

    /// Start ticking.
    ///
    /// The initial chain runs synchronously on the first call only, and the
    /// first tick fires immediately. Starting a running engine is a no-op;
    /// starting a paused engine resumes it.
    pub fn start(&self) -> TaskResult<()> {
        let handle = Handle::try_current().map_err(|_| TaskError::NoRuntime {
            engine: self.shared.name.clone(),
        })?;

        let initial = {
            let mut core = self.shared.core.lock();
            match core.state {
                TaskState::Running => return Ok(()),
                TaskState::Destroying | TaskState::Destroyed => {
                    return Err(TaskError::Destroyed {
                        engine: self.shared.name.clone(),
                    })
                }
                TaskState::Initialized | TaskState::Paused => {}
            }
            if core.initial_ran {
                None
            } else {
                core.initial_ran = true;
                Some(core.initial.clone())
            }
        };

        if let Some(actions) = initial {
            debug!(engine = %self.shared.name, count = actions.len(), "Running initial chain");
            if let Err(e) = run_chain(&actions, &self.shared.name, ChainKind::Initial) {
                self.shared.report(e);
            }
        }

        {
            let mut core = self.shared.core.lock();
            // destroy() may have raced the initial chain
            if core.state.is_terminal() {
                return Err(TaskError::Destroyed {
                    engine: self.shared.name.clone(),
                });
            }
            core.state = TaskState::Running;
            core.fire_now = true;
            if core.driver.is_none() {
                let shared = Arc::clone(&self.shared);
                core.driver = Some(handle.spawn(drive(shared)));
            }
        }

        self.shared.publish(TaskState::Running);
        self.shared.wake.notify_one();
        debug!(engine = %self.shared.name, "Engine started");
        Ok(())
    }

    /// Suspend ticks. No-op unless running.
    pub fn pause(&self) {
        {
            let mut core = self.shared.core.lock();
            if core.state != TaskState::Running {
                return;
            }
            core.state = TaskState::Paused;
        }
        self.shared.publish(TaskState::Paused);
        self.shared.wake.notify_one();
        debug!(engine = %self.shared.name, "Engine paused");
    }

    /// Resume ticking with an immediate tick. No-op unless paused.
    pub fn resume(&self) {
        {
            let mut core = self.shared.core.lock();
            if core.state != TaskState::Paused {
                return;
            }
            core.state = TaskState::Running;
            core.fire_now = true;
        }
        self.shared.publish(TaskState::Running);
        self.shared.wake.notify_one();
        debug!(engine = %self.shared.name, "Engine resumed");
    }

    /// Tear the engine down.
    ///
    /// A running engine moves to `Destroying` and runs its final chain after
    /// `grace`. An engine that is not running runs the final chain right away.
    /// Calling this more than once has no further effect.
    ///
    /// No new tick starts once this returns, even if one falls due during the grace
    /// period. Use [`wait_destroyed`](Self::wait_destroyed) to wait for the
    /// final chain.
    pub fn destroy(&self, grace: Duration) {
        let finalizers = {
            let mut core = self.shared.core.lock();
            match core.state {
                TaskState::Destroying | TaskState::Destroyed => return,
                TaskState::Running => {
                    core.state = TaskState::Destroying;
                    core.destroy_at = Some(Instant::now() + grace);
                    None
                }
                TaskState::Initialized | TaskState::Paused => {
                    core.state = TaskState::Destroying;
                    Some(core.finalizers.clone())
                }
            }
        };

        self.shared.publish(TaskState::Destroying);

        match finalizers {
            Some(actions) => {
                self.shared.finish(&actions);
                self.shared.wake.notify_one();
            }
            None => {
                debug!(engine = %self.shared.name, grace_ms = grace.as_millis() as u64, "Engine destroying");
                self.shared.wake.notify_one();
            }
        }
    }

    /// Wait until the final chain has run.
    pub async fn wait_destroyed(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `shared`, which we hold, so this cannot fail
        let _ = rx.wait_for(|s| *s == TaskState::Destroyed).await;
    }
}

impl Drop for PeriodicTaskEngine {
    fn drop(&mut self) {
        let driver = self.shared.core.lock().driver.take();
        if let Some(driver) = driver {
            trace!(engine = %self.shared.name, "Aborting driver on drop");
            driver.abort();
        }
    }
}

impl std::fmt::Debug for PeriodicTaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("PeriodicTaskEngine")
            .field("name", &self.shared.name)
            .field("state", &core.state)
            .field("interval", &core.interval)
            .field("ticks", &core.ticks)
            .finish()
    }
}

impl Shared {
    fn publish(&self, state: TaskState) {
        self.state_tx.send_replace(state);
    }

    /// Log a chain failure and hand it to the sink.
    fn report(&self, err: TaskError) {
        error!(engine = %self.name, "{}", err);
        let sink = self.core.lock().error_sink.clone();
        if let Some(sink) = sink {
            sink(&err);
        }
    }

    /// Run the tick chain once, unless the engine left `Running` meanwhile.
    fn run_tick(&self) {
        let actions = {
            let mut core = self.core.lock();
            if core.state != TaskState::Running {
                return;
            }
            core.ticks += 1;
            core.tick.clone()
        };

        if let Err(e) = run_chain(&actions, &self.name, ChainKind::Tick) {
            self.report(e);
        }
    }

    /// Run the final chain and publish `Destroyed`.
    fn finish(&self, finalizers: &[Action]) {
        if let Err(e) = run_chain(finalizers, &self.name, ChainKind::Final) {
            self.report(e);
        }
        self.core.lock().state = TaskState::Destroyed;
        self.publish(TaskState::Destroyed);
        debug!(engine = %self.name, "Engine destroyed");
    }

    /// Grace period elapsed while `Destroying`.
    fn finalize_after_grace(&self) {
        let finalizers = {
            let mut core = self.core.lock();
            if core.state != TaskState::Destroying {
                return;
            }
            core.destroy_at = None;
            core.finalizers.clone()
        };
        self.finish(&finalizers);
    }
}

/// Driver task: sleep until the next deadline, replan on every wake.
///
/// A paused engine forgets its schedule, so a resume ticks immediately and
/// then one interval later.
async fn drive(shared: Arc<Shared>) {
    let mut next_at: Option<Instant> = None;

    loop {
        let plan = {
            let mut core = shared.core.lock();
            match core.state {
                TaskState::Destroyed => return,
                TaskState::Running => {
                    let at = if core.fire_now {
                        core.fire_now = false;
                        Instant::now()
                    } else {
                        match next_at {
                            Some(at) => at,
                            None => Instant::now() + core.interval,
                        }
                    };
                    next_at = Some(at);
                    Plan::TickAt(at)
                }
                TaskState::Initialized | TaskState::Paused => {
                    next_at = None;
                    Plan::Wait
                }
                TaskState::Destroying => match core.destroy_at {
                    Some(at) => Plan::FinalizeAt(at),
                    None => Plan::Wait,
                },
            }
        };

        match plan {
            Plan::Wait => shared.wake.notified().await,
            Plan::TickAt(at) => {
                tokio::select! {
                    _ = sleep_until(at) => {
                        shared.run_tick();
                        let interval = shared.core.lock().interval;
                        next_at = Some(Instant::now() + interval);
                    }
                    _ = shared.wake.notified() => {}
                }
            }
            Plan::FinalizeAt(at) => {
                tokio::select! {
                    _ = sleep_until(at) => {
                        shared.finalize_after_grace();
                        return;
                    }
                    _ = shared.wake.notified() => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    fn counter_action(counter: &Arc<AtomicU32>) -> Action {
        let counter = Arc::clone(counter);
        Action::infallible(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn count(counter: &Arc<AtomicU32>) -> u32 {
        counter.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_initial_once_and_ticks_immediately() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        let initial = Arc::new(AtomicU32::new(0));
        let ticks = Arc::new(AtomicU32::new(0));
        engine.add_initial_task(counter_action(&initial));
        engine.add_task(counter_action(&ticks));

        engine.start().unwrap();
        assert_eq!(count(&initial), 1);
        assert_eq!(engine.state(), TaskState::Running);

        // Ticks at 0, 1000, 2000, 3000
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(count(&ticks), 4);

        engine.start().unwrap();
        engine.pause();
        engine.start().unwrap();
        assert_eq!(count(&initial), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_engine_never_ticks() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        let ticks = Arc::new(AtomicU32::new(0));
        engine.add_task(counter_action(&ticks));

        engine.start().unwrap();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(count(&ticks), 2);

        engine.pause();
        engine.pause();
        assert_eq!(engine.state(), TaskState::Paused);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(count(&ticks), 2);

        engine.resume();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(count(&ticks), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_only_from_paused() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        engine.resume();
        assert_eq!(engine.state(), TaskState::Initialized);

        engine.start().unwrap();
        engine.resume();
        assert_eq!(engine.state(), TaskState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_running_waits_for_grace() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        let ticks = Arc::new(AtomicU32::new(0));
        let finals = Arc::new(AtomicU32::new(0));
        engine.add_task(counter_action(&ticks));
        engine.add_final_task(counter_action(&finals));

        engine.start().unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(count(&ticks), 1);

        engine.destroy(Duration::from_millis(2000));
        assert_eq!(engine.state(), TaskState::Destroying);

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(count(&ticks), 1, "no ticks while destroying");
        assert_eq!(count(&finals), 0);

        engine.wait_destroyed().await;
        assert_eq!(engine.state(), TaskState::Destroyed);
        assert_eq!(count(&finals), 1);

        engine.destroy(Duration::from_millis(2000));
        sleep(Duration::from_secs(5)).await;
        assert_eq!(count(&finals), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_idle_engine_finalizes_immediately() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        let finals = Arc::new(AtomicU32::new(0));
        engine.add_final_task(counter_action(&finals));

        engine.destroy(DEFAULT_DESTROY_GRACE);
        assert_eq!(engine.state(), TaskState::Destroyed);
        assert_eq!(count(&finals), 1);

        engine.destroy(DEFAULT_DESTROY_GRACE);
        assert_eq!(count(&finals), 1);
        assert!(matches!(engine.start(), Err(TaskError::Destroyed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_paused_engine_finalizes_immediately() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        let finals = Arc::new(AtomicU32::new(0));
        engine.add_final_task(counter_action(&finals));

        engine.start().unwrap();
        engine.pause();
        engine.destroy(DEFAULT_DESTROY_GRACE);
        assert_eq!(engine.state(), TaskState::Destroyed);
        assert_eq!(count(&finals), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_action_aborts_tick_but_engine_keeps_running() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        let after = Arc::new(AtomicU32::new(0));
        let errors = Arc::new(AtomicU32::new(0));

        engine.add_task(Action::new(|| Err("check failed".into())));
        engine.add_task(counter_action(&after));
        let sink_errors = Arc::clone(&errors);
        engine.set_error_sink(Arc::new(move |err| {
            assert!(matches!(err, TaskError::ActionFailed { chain: ChainKind::Tick, .. }));
            sink_errors.fetch_add(1, Ordering::SeqCst);
        }));

        engine.start().unwrap();
        sleep(Duration::from_millis(2500)).await;

        assert_eq!(count(&after), 0);
        assert_eq!(count(&errors), 3);
        assert_eq!(engine.state(), TaskState::Running);
        assert_eq!(engine.tick_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_action_is_contained() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        let errors = Arc::new(AtomicU32::new(0));
        engine.add_task(Action::infallible(|| panic!("tick panic")));
        let sink_errors = Arc::clone(&errors);
        engine.set_error_sink(Arc::new(move |_| {
            sink_errors.fetch_add(1, Ordering::SeqCst);
        }));

        engine.start().unwrap();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(count(&errors), 2);
        assert_eq!(engine.state(), TaskState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_action_stops_running() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        let ticks = Arc::new(AtomicU32::new(0));
        let action = counter_action(&ticks);
        engine.add_task(action.clone());

        assert!(!engine.remove_task(&Action::infallible(|| {})));

        engine.start().unwrap();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(count(&ticks), 1);

        assert!(engine.remove_task(&action));
        sleep(Duration::from_millis(3000)).await;
        assert_eq!(count(&ticks), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_changes_spacing() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        let ticks = Arc::new(AtomicU32::new(0));
        engine.add_task(counter_action(&ticks));

        engine.start().unwrap();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(count(&ticks), 1);

        // The tick scheduled for 1000 keeps its deadline
        engine.set_interval(Duration::from_millis(5000));
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(count(&ticks), 2);

        // Next one is 5000 after that
        sleep(Duration::from_millis(4000)).await;
        assert_eq!(count(&ticks), 2);
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(count(&ticks), 3);
        assert_eq!(engine.interval(), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_are_published() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        let rx = engine.subscribe();
        assert_eq!(*rx.borrow(), TaskState::Initialized);

        engine.start().unwrap();
        assert_eq!(*rx.borrow(), TaskState::Running);
        engine.pause();
        assert_eq!(*rx.borrow(), TaskState::Paused);
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let engine = PeriodicTaskEngine::new("test", Duration::from_millis(1000));
        assert!(matches!(engine.start(), Err(TaskError::NoRuntime { .. })));
        assert_eq!(engine.state(), TaskState::Initialized);
    }
}
