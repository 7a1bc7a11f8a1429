//! # GSV Resource Monitor
//!
//! Samples CPU and memory usage of one process on a fixed interval.
//!
//! [`ResourceSampler`] runs on a [`gsv_task::PeriodicTaskEngine`] and reads
//! the OS through a [`ProcessProbe`]; [`SysinfoProbe`] is the real one.

pub mod probe;
pub mod sampler;
pub mod units;

pub use probe::{ProbeReading, ProcessProbe, SysinfoProbe};
pub use sampler::{ResourceSample, ResourceSampler, SampleConsumer, DEFAULT_SAMPLE_INTERVAL};
pub use units::format_bytes;
