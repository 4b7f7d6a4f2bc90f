//! Cached hardware snapshot with lazy, best-effort detection.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use crate::detect;
use crate::snapshot::HardwareSnapshot;
use crate::tuning;
use mf_core::{ExecutionConfig, OutputFormat};

/// Instantaneous host utilisation, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemLoad {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Owns the host's [`HardwareSnapshot`].
///
/// Detection happens at most once unless [`HardwareProfiler::redetect`] is
/// called. A failed detection is logged and replaced by a conservative
/// fallback snapshot, so callers always get a snapshot back.
pub struct HardwareProfiler {
    cached: RwLock<Option<Arc<HardwareSnapshot>>>,
    detect_lock: tokio::sync::Mutex<()>,
    system: Mutex<System>,
}

impl HardwareProfiler {
    pub fn new() -> Self {
        Self {
            cached: RwLock::new(None),
            detect_lock: tokio::sync::Mutex::new(()),
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            )),
        }
    }

    /// A profiler that never probes the host and always returns `snapshot`.
    pub fn with_snapshot(snapshot: HardwareSnapshot) -> Self {
        let profiler = Self::new();
        *profiler.cached.write() = Some(Arc::new(snapshot));
        profiler
    }

    /// The cached snapshot, detecting it first if needed.
    pub async fn snapshot(&self) -> Arc<HardwareSnapshot> {
        if let Some(snap) = self.cached() {
            return snap;
        }

        let _guard = self.detect_lock.lock().await;
        // Another caller may have finished detection while we waited.
        if let Some(snap) = self.cached() {
            return snap;
        }
        self.detect_and_store().await
    }

    /// The cached snapshot without triggering detection.
    pub fn cached(&self) -> Option<Arc<HardwareSnapshot>> {
        self.cached.read().clone()
    }

    /// Discard the cached snapshot and probe the host again.
    pub async fn redetect(&self) -> Arc<HardwareSnapshot> {
        let _guard = self.detect_lock.lock().await;
        self.detect_and_store().await
    }

    async fn detect_and_store(&self) -> Arc<HardwareSnapshot> {
        tracing::info!("Detecting hardware capabilities");
        let snapshot = match detect::detect().await {
            Ok(snap) => {
                tracing::info!(
                    cores = snap.cpu.cores,
                    threads = snap.cpu.threads,
                    cpu = %snap.cpu.model,
                    gpu = ?snap.best_gpu(),
                    memory_total = snap.memory.total,
                    "Hardware detection completed"
                );
                snap
            }
            Err(e) => {
                tracing::warn!("Hardware detection failed, using fallback snapshot: {e}");
                HardwareSnapshot::fallback(detect::os_memory())
            }
        };
        let snapshot = Arc::new(snapshot);
        *self.cached.write() = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Scheduler concurrency recommended for this host.
    pub async fn recommended_concurrency(&self) -> usize {
        let snapshot = self.snapshot().await;
        tuning::recommended_concurrency(&snapshot)
    }

    /// Execution config for one job, honouring the GPU-acceleration switch.
    pub async fn config_for(
        &self,
        file_size: u64,
        format: OutputFormat,
        gpu_acceleration: bool,
    ) -> ExecutionConfig {
        let snapshot = self.snapshot().await;
        if gpu_acceleration {
            tuning::derive_config(&snapshot, file_size, format)
        } else {
            tuning::derive_config(&snapshot.cpu_only(), file_size, format)
        }
    }

    /// Current CPU and memory utilisation. Zeroes on any failure.
    ///
    /// CPU usage is measured between consecutive calls, so the first call
    /// usually reports 0.
    pub fn current_load(&self) -> SystemLoad {
        let mut system = self.system.lock();
        system.refresh_cpu_all();
        system.refresh_memory();

        let cpu = system.global_cpu_usage();
        let total = system.total_memory();
        let memory_percent = if total > 0 {
            let used = total.saturating_sub(system.available_memory());
            (used as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };

        SystemLoad {
            cpu_percent: if cpu.is_finite() { cpu.round() } else { 0.0 },
            memory_percent: memory_percent.round(),
        }
    }
}

impl Default for HardwareProfiler {
    fn default() -> Self {
        Self::new()
    }
}
