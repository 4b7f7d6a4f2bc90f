//! mf-hw: hardware profiling and execution tuning.
//!
//! Captures a [`HardwareSnapshot`] of the host once, caches it in a
//! [`HardwareProfiler`], and derives per-job [`mf_core::ExecutionConfig`]s and the
//! recommended scheduler concurrency from it.

pub mod detect;
pub mod profiler;
pub mod snapshot;
pub mod tuning;

pub use profiler::{HardwareProfiler, SystemLoad};
pub use snapshot::{CpuInfo, GpuInfo, GpuSet, GpuVendor, HardwareSnapshot, MemoryInfo};
pub use tuning::{derive_config, estimate, recommended_concurrency, ConversionEstimate};
