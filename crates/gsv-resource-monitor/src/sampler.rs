//! Per-process resource sampler.
//!
//! CPU usage is derived from the process's accumulated processor time:
//! the delta since the previous tick, divided by the wall-clock delta and
//! the number of logical cores, clamped to `0..=100`. Memory is the resident
//! set size as reported by the probe.

use crate::probe::{ProbeReading, ProcessProbe};
use gsv_common::{ProcessError, ProcessResult};
use gsv_task::{Action, ErrorSink, PeriodicTaskEngine, TaskResult, TaskState};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Sampling interval used unless configured otherwise.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(1000);

/// Latest CPU and memory figures of the sampled process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    /// Share of total machine capacity, `0.0..=100.0`.
    pub cpu_percent: f64,
    /// Resident set size.
    pub memory_bytes: u64,
}

/// Callback handed every fresh [`ResourceSample`].
pub type SampleConsumer = Arc<dyn Fn(ResourceSample) + Send + Sync>;

struct Baseline {
    processor_time: Duration,
    at: Instant,
}

struct SamplerCore {
    pid: u32,
    probe: Arc<dyn ProcessProbe>,
    baseline: Mutex<Option<Baseline>>,
    latest: Mutex<Option<ResourceSample>>,
    consumer: Mutex<Option<SampleConsumer>>,
}

/// Samples one process on every engine tick.
///
/// If the process goes away the tick reports an error and the last sample
/// stays in place.
///
/// # Example
/// ```
/// use gsv_resource_monitor::{ResourceSampler, SysinfoProbe};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let probe = Arc::new(SysinfoProbe::new());
/// let sampler = ResourceSampler::for_pid(std::process::id(), probe, Duration::from_millis(50));
/// sampler.run().unwrap();
/// tokio::time::sleep(Duration::from_millis(120)).await;
///
/// let sample = sampler.latest().unwrap();
/// assert!(sample.memory_bytes > 0);
/// assert!((0.0..=100.0).contains(&sample.cpu_percent));
/// sampler.destroy(Duration::ZERO);
/// # }
/// ```
pub struct ResourceSampler {
    core: Arc<SamplerCore>,
    engine: PeriodicTaskEngine,
}

impl ResourceSampler {
    /// Sample `pid` every `interval` through `probe`.
    ///
    /// Nothing is read until [`run`](Self::run), which takes the CPU baseline
    /// that later ticks measure against.
    pub fn for_pid(pid: u32, probe: Arc<dyn ProcessProbe>, interval: Duration) -> Self {
        let core = Arc::new(SamplerCore {
            pid,
            probe,
            baseline: Mutex::new(None),
            latest: Mutex::new(None),
            consumer: Mutex::new(None),
        });

        let engine = PeriodicTaskEngine::new(format!("sampler[{}]", pid), interval);

        let initial = Arc::clone(&core);
        engine.add_initial_task(Action::new(move || {
            initial.take_baseline()?;
            Ok(())
        }));

        let tick = Arc::clone(&core);
        engine.add_task(Action::new(move || {
            tick.sample()?;
            Ok(())
        }));

        Self { core, engine }
    }

    /// Resolve `name` to exactly one running process.
    ///
    /// Fails with [`ProcessError::Ambiguous`] when several processes share
    /// the name; pass a pid to [`for_pid`](Self::for_pid) instead.
    pub fn for_name(
        name: &str,
        probe: Arc<dyn ProcessProbe>,
        interval: Duration,
    ) -> ProcessResult<Self> {
        let pids = probe.find_by_name(name);
        match pids.as_slice() {
            [] => Err(ProcessError::not_found(name)),
            [pid] => Ok(Self::for_pid(*pid, probe, interval)),
            _ => Err(ProcessError::ambiguous(name, pids)),
        }
    }

    /// Pid being sampled.
    pub fn pid(&self) -> u32 {
        self.core.pid
    }

    /// Most recent sample, `None` before the first tick succeeds.
    pub fn latest(&self) -> Option<ResourceSample> {
        *self.core.latest.lock()
    }

    /// CPU share from the latest sample, or zero.
    pub fn cpu_percent(&self) -> f64 {
        self.latest().map(|s| s.cpu_percent).unwrap_or(0.0)
    }

    /// Resident memory from the latest sample, or zero.
    pub fn memory_bytes(&self) -> u64 {
        self.latest().map(|s| s.memory_bytes).unwrap_or(0)
    }

    /// Called with every fresh sample.
    pub fn on_sample(&self, consumer: SampleConsumer) {
        *self.core.consumer.lock() = Some(consumer);
    }

    /// Receive failed samples, for instance when the process has exited.
    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.engine.set_error_sink(sink);
    }

    /// Change the sampling interval.
    pub fn set_interval(&self, interval: Duration) {
        self.engine.set_interval(interval);
    }

    /// State of the underlying engine.
    pub fn state(&self) -> TaskState {
        self.engine.state()
    }

    /// Take the baseline and start sampling. Must be called inside a tokio runtime.
    pub fn run(&self) -> TaskResult<()> {
        self.engine.start()
    }

    /// Stop sampling. The latest sample is kept.
    pub fn pause(&self) {
        self.engine.pause();
    }

    /// Sample again, starting with an immediate tick.
    pub fn resume(&self) {
        self.engine.resume();
    }

    /// Stop for good after `grace`. Idempotent.
    pub fn destroy(&self, grace: Duration) {
        self.engine.destroy(grace);
    }
}

impl SamplerCore {
    /// Probe the process, telling a vanished process apart from a failed read.
    fn read(&self) -> ProcessResult<ProbeReading> {
        self.probe.sample(self.pid).map_err(|e| {
            match gsv_process::process_exists(self.pid) {
                Ok(false) => ProcessError::monitoring(self.pid.to_string(), "process has exited"),
                _ => ProcessError::monitoring(self.pid.to_string(), e.to_string()),
            }
        })
    }

    fn take_baseline(&self) -> ProcessResult<()> {
        let reading = self.read()?;
        *self.baseline.lock() = Some(Baseline {
            processor_time: reading.processor_time,
            at: Instant::now(),
        });
        Ok(())
    }

    /// Take one sample, publish it and move the baseline forward.
    fn sample(&self) -> ProcessResult<ResourceSample> {
        let reading = self.read()?;
        let now = Instant::now();

        let cpu_percent = {
            let mut baseline = self.baseline.lock();
            let percent = match baseline.as_ref() {
                Some(prev) => cpu_percent(
                    prev.processor_time,
                    reading.processor_time,
                    now.saturating_duration_since(prev.at),
                    self.probe.logical_cores(),
                ),
                None => 0.0,
            };
            *baseline = Some(Baseline {
                processor_time: reading.processor_time,
                at: now,
            });
            percent
        };

        let sample = ResourceSample {
            cpu_percent,
            memory_bytes: reading.memory_bytes,
        };
        *self.latest.lock() = Some(sample);
        debug!(pid = self.pid, cpu = cpu_percent, memory = reading.memory_bytes, "Resource sample");

        let consumer = self.consumer.lock().clone();
        if let Some(consumer) = consumer {
            consumer(sample);
        }
        Ok(sample)
    }
}

/// CPU share over one interval, clamped to `0.0..=100.0`.
///
/// A processor-time counter that went backwards counts as no usage.
pub(crate) fn cpu_percent(previous: Duration, current: Duration, wall: Duration, cores: usize) -> f64 {
    if wall.is_zero() || cores == 0 {
        return 0.0;
    }
    let used = current.saturating_sub(previous);
    let percent = used.as_secs_f64() / wall.as_secs_f64() / cores as f64 * 100.0;
    percent.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    /// Pid that no test machine will have.
    const GHOST_PID: u32 = 3_999_999;

    struct ScriptedProbe {
        readings: Mutex<VecDeque<ProcessResult<ProbeReading>>>,
        names: HashMap<String, Vec<u32>>,
        cores: usize,
    }

    impl ScriptedProbe {
        fn new(cores: usize, readings: Vec<ProcessResult<ProbeReading>>) -> Arc<Self> {
            Arc::new(Self {
                readings: Mutex::new(readings.into()),
                names: HashMap::new(),
                cores,
            })
        }

        fn with_names(names: &[(&str, Vec<u32>)]) -> Arc<Self> {
            Arc::new(Self {
                readings: Mutex::new(VecDeque::new()),
                names: names
                    .iter()
                    .map(|(n, pids)| (n.to_string(), pids.clone()))
                    .collect(),
                cores: 1,
            })
        }
    }

    impl ProcessProbe for ScriptedProbe {
        fn sample(&self, pid: u32) -> ProcessResult<ProbeReading> {
            self.readings
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ProcessError::not_found(pid.to_string())))
        }

        fn find_by_name(&self, name: &str) -> Vec<u32> {
            self.names.get(name).cloned().unwrap_or_default()
        }

        fn logical_cores(&self) -> usize {
            self.cores
        }
    }

    fn reading(cpu_ms: u64, memory_bytes: u64) -> ProcessResult<ProbeReading> {
        Ok(ProbeReading {
            processor_time: Duration::from_millis(cpu_ms),
            memory_bytes,
        })
    }

    #[test]
    fn test_cpu_percent_math() {
        let second = Duration::from_secs(1);
        assert_eq!(cpu_percent(Duration::ZERO, Duration::from_millis(500), second, 1), 50.0);
        assert_eq!(cpu_percent(Duration::ZERO, Duration::from_millis(1000), second, 4), 25.0);
    }

    #[test]
    fn test_cpu_percent_never_negative() {
        let value = cpu_percent(Duration::from_secs(10), Duration::from_secs(9), Duration::from_secs(1), 2);
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_cpu_percent_clamped_to_full_machine() {
        let value = cpu_percent(Duration::ZERO, Duration::from_secs(8), Duration::from_secs(1), 2);
        assert_eq!(value, 100.0);
    }

    #[test]
    fn test_cpu_percent_zero_wall_time() {
        assert_eq!(cpu_percent(Duration::ZERO, Duration::from_secs(1), Duration::ZERO, 2), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_cpu_and_memory_each_tick() {
        let probe = ScriptedProbe::new(
            2,
            vec![
                reading(0, 100), // baseline
                reading(0, 100), // tick at 0, zero wall delta
                reading(1000, 200),
                reading(1500, 300),
            ],
        );
        let sampler = ResourceSampler::for_pid(GHOST_PID, probe, Duration::from_millis(1000));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        sampler.on_sample(Arc::new(move |s| sink.lock().push(s)));

        sampler.run().unwrap();
        sleep(Duration::from_millis(2500)).await;

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].cpu_percent, 0.0);
        assert_eq!(seen[1].cpu_percent, 50.0);
        assert_eq!(seen[2].cpu_percent, 25.0);
        assert_eq!(sampler.memory_bytes(), 300);
        assert_eq!(sampler.cpu_percent(), 25.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_process_freezes_last_sample() {
        let probe = ScriptedProbe::new(1, vec![reading(0, 100), reading(100, 4096)]);
        let sampler = ResourceSampler::for_pid(GHOST_PID, probe, Duration::from_millis(1000));
        let errors = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&errors);
        sampler.set_error_sink(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sampler.run().unwrap();
        sleep(Duration::from_millis(2500)).await;

        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert_eq!(sampler.memory_bytes(), 4096);
        assert_eq!(sampler.state(), TaskState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_sampler_does_not_read() {
        let probe = ScriptedProbe::new(1, (0..10).map(|i| reading(i * 10, 100 + i)).collect());
        let sampler = ResourceSampler::for_pid(GHOST_PID, probe, Duration::from_millis(1000));
        let samples = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&samples);
        sampler.on_sample(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sampler.run().unwrap();
        sleep(Duration::from_millis(500)).await;
        sampler.pause();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(samples.load(Ordering::SeqCst), 1);

        sampler.destroy(Duration::from_millis(100));
        assert_eq!(sampler.state(), TaskState::Destroyed);
    }

    #[test]
    fn test_for_name_requires_unique_match() {
        let probe = ScriptedProbe::with_names(&[("PalServer", vec![41]), ("Twin", vec![7, 9])]);

        let sampler = ResourceSampler::for_name("PalServer", probe.clone(), DEFAULT_SAMPLE_INTERVAL).unwrap();
        assert_eq!(sampler.pid(), 41);

        match ResourceSampler::for_name("Twin", probe.clone(), DEFAULT_SAMPLE_INTERVAL) {
            Err(ProcessError::Ambiguous { pids, .. }) => assert_eq!(pids, vec![7, 9]),
            _ => panic!("expected ambiguity error"),
        }

        assert!(matches!(
            ResourceSampler::for_name("Missing", probe, DEFAULT_SAMPLE_INTERVAL),
            Err(ProcessError::NotFound { .. })
        ));
    }
}
