//! Host probing.
//!
//! CPU and memory come from `sysinfo` and `num_cpus`; GPU controllers are
//! enumerated with the platform's own listing tool (`lspci`,
//! `system_profiler`, or `wmic`). A missing or failing GPU tool means "no
//! GPU", never a detection error.

use std::time::Duration;

use mf_core::{Error, Result};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::process::Command;

use crate::snapshot::{CpuInfo, GpuSet, HardwareSnapshot, MemoryInfo};

/// Upper bound on how long a GPU listing tool may run.
const GPU_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe the host. Fails with [`Error::Detection`] when CPU or memory
/// information is unavailable.
pub async fn detect() -> Result<HardwareSnapshot> {
    let (cpu, memory) = tokio::task::spawn_blocking(probe_cpu_and_memory)
        .await
        .map_err(|e| Error::Detection(format!("probe task failed: {e}")))??;

    let controllers = list_gpu_controllers().await;
    tracing::debug!(?controllers, "GPU controllers");

    Ok(HardwareSnapshot {
        cpu,
        gpu: GpuSet::from_controllers(&controllers),
        memory,
        platform: std::env::consts::OS.into(),
    })
}

/// Memory as reported by the OS, for the fallback snapshot. Zeroes when even
/// that is unavailable.
pub fn os_memory() -> MemoryInfo {
    let mut sys = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
    );
    sys.refresh_memory();
    MemoryInfo {
        total: sys.total_memory(),
        available: sys.available_memory(),
    }
}

fn probe_cpu_and_memory() -> Result<(CpuInfo, MemoryInfo)> {
    let mut sys = System::new_with_specifics(
        RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything()),
    );
    sys.refresh_memory();

    let threads = num_cpus::get();
    if threads == 0 {
        return Err(Error::Detection("no CPUs reported".into()));
    }
    // Affinity masks can hide cores from the logical count.
    let cores = num_cpus::get_physical().clamp(1, threads);

    let model = sys
        .cpus()
        .first()
        .map(|c| {
            let vendor = c.vendor_id().trim();
            let brand = c.brand().trim();
            if brand.is_empty() {
                vendor.to_string()
            } else {
                brand.to_string()
            }
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "Unknown CPU".into());

    let total = sys.total_memory();
    if total == 0 {
        return Err(Error::Detection("total memory reported as 0".into()));
    }

    Ok((
        CpuInfo {
            cores,
            threads,
            model,
        },
        MemoryInfo {
            total,
            available: sys.available_memory(),
        },
    ))
}

/// Names of the display controllers present on this host.
async fn list_gpu_controllers() -> Vec<String> {
    let (program, args, parse): (&str, &[&str], fn(&str) -> Vec<String>) =
        match std::env::consts::OS {
            "linux" => ("lspci", &[], parse_lspci),
            "macos" => (
                "system_profiler",
                &["SPDisplaysDataType"],
                parse_system_profiler,
            ),
            "windows" => (
                "wmic",
                &["path", "win32_VideoController", "get", "name"],
                parse_wmic,
            ),
            other => {
                tracing::debug!("No GPU listing tool for platform {other}");
                return Vec::new();
            }
        };

    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);

    match tokio::time::timeout(GPU_QUERY_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            parse(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(Ok(output)) => {
            tracing::debug!("{program} exited with {}", output.status);
            Vec::new()
        }
        Ok(Err(e)) => {
            tracing::debug!("{program} unavailable: {e}");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("{program} timed out after {GPU_QUERY_TIMEOUT:?}");
            Vec::new()
        }
    }
}

/// Display-class devices from `lspci` output.
pub(crate) fn parse_lspci(stdout: &str) -> Vec<String> {
    const CLASSES: [&str; 3] = [
        "VGA compatible controller",
        "3D controller",
        "Display controller",
    ];
    stdout
        .lines()
        .filter_map(|line| {
            let class = CLASSES.iter().find(|c| line.contains(*c))?;
            let (_, rest) = line.split_once(class)?;
            let name = rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
            (!name.is_empty()).then(|| name.trim().to_string())
        })
        .collect()
}

/// `Chipset Model:` entries from `system_profiler SPDisplaysDataType`.
pub(crate) fn parse_system_profiler(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Chipset Model:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Controller names from `wmic ... get name` (first line is the header).
pub(crate) fn parse_wmic(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}
