//! OS access for the sampler.
//!
//! [`ProcessProbe`] is the seam between the sampler's arithmetic and the
//! operating system. Tests drive the sampler with scripted readings;
//! production uses [`SysinfoProbe`], which refreshes only the counters it
//! reads.

use gsv_common::{ProcessError, ProcessResult};
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// One raw OS reading for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReading {
    /// Total CPU time consumed across all cores.
    pub processor_time: Duration,
    /// Resident set size.
    pub memory_bytes: u64,
}

/// Reads process counters from the operating system.
pub trait ProcessProbe: Send + Sync {
    /// Read the counters of `pid`. Fails with `NotFound` once it is gone.
    fn sample(&self, pid: u32) -> ProcessResult<ProbeReading>;

    /// Pids of all processes whose executable name is `name`.
    fn find_by_name(&self, name: &str) -> Vec<u32>;

    /// Logical CPUs available to the machine.
    fn logical_cores(&self) -> usize;
}

/// [`ProcessProbe`] backed by `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    cores: usize,
}

impl SysinfoProbe {
    /// Create a probe with an empty process table. Each call refreshes only what it reads.
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            system: Mutex::new(System::new()),
            cores,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn sample(&self, pid: u32) -> ProcessResult<ProbeReading> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let process = system
            .process(sys_pid)
            .ok_or_else(|| ProcessError::not_found(pid.to_string()))?;

        Ok(ProbeReading {
            processor_time: Duration::from_millis(process.accumulated_cpu_time()),
            memory_bytes: process.memory(),
        })
    }

    fn find_by_name(&self, name: &str) -> Vec<u32> {
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(_, process)| process.name() == OsStr::new(name))
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();
        pids
    }

    fn logical_cores(&self) -> usize {
        self.cores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_own_process() {
        let probe = SysinfoProbe::new();
        let reading = probe.sample(std::process::id()).unwrap();
        assert!(reading.memory_bytes > 0);
        assert!(probe.logical_cores() >= 1);
    }

    #[test]
    fn test_sample_missing_process() {
        let probe = SysinfoProbe::new();
        let result = probe.sample(u32::MAX - 1);
        assert!(matches!(result, Err(ProcessError::NotFound { .. })));
    }

    #[test]
    fn test_find_unknown_name() {
        let probe = SysinfoProbe::new();
        assert!(probe.find_by_name("no-such-game-server-binary").is_empty());
    }
}
