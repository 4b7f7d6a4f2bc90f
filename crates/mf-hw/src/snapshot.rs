//! The captured hardware description.

use serde::{Deserialize, Serialize};
use std::fmt;

use mf_core::EncoderFamily;

const GIB: u64 = 1024 * 1024 * 1024;

/// GPU vendors the profiler knows how to use, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
}

impl GpuVendor {
    /// Preference order used when more than one vendor is present.
    pub const PREFERENCE: [GpuVendor; 3] = [Self::Nvidia, Self::Amd, Self::Intel];

    /// Hardware encoder family driven through this vendor's GPU.
    pub fn encoder(&self) -> EncoderFamily {
        match self {
            Self::Nvidia => EncoderFamily::Nvenc,
            Self::Amd => EncoderFamily::Amf,
            Self::Intel => EncoderFamily::Qsv,
        }
    }

    /// Whether a controller name (vendor or model string) belongs to this
    /// vendor.
    pub fn matches(&self, controller: &str) -> bool {
        let name = controller.to_ascii_lowercase();
        let keywords: &[&str] = match self {
            Self::Nvidia => &["nvidia", "geforce", "quadro", "tesla"],
            Self::Amd => &["amd", "ati", "radeon"],
            Self::Intel => &["intel", "iris", "uhd"],
        };
        keywords.iter().any(|k| contains_word_prefix(&name, k))
    }
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nvidia => write!(f, "nvidia"),
            Self::Amd => write!(f, "amd"),
            Self::Intel => write!(f, "intel"),
        }
    }
}

/// Keyword match anchored at a word start, so "ati" does not match
/// "Corporation" while "ATI Technologies" still does.
fn contains_word_prefix(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(i, _)| {
        i == 0
            || !haystack[..i]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInfo {
    /// Physical cores.
    pub cores: usize,
    /// Logical processors.
    pub threads: usize,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GpuInfo {
    pub fn present(model: impl Into<String>) -> Self {
        Self {
            available: true,
            model: Some(model.into()),
        }
    }
}

/// Per-vendor GPU availability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSet {
    pub nvidia: GpuInfo,
    pub amd: GpuInfo,
    pub intel: GpuInfo,
}

impl GpuSet {
    pub fn get(&self, vendor: GpuVendor) -> &GpuInfo {
        match vendor {
            GpuVendor::Nvidia => &self.nvidia,
            GpuVendor::Amd => &self.amd,
            GpuVendor::Intel => &self.intel,
        }
    }

    fn get_mut(&mut self, vendor: GpuVendor) -> &mut GpuInfo {
        match vendor {
            GpuVendor::Nvidia => &mut self.nvidia,
            GpuVendor::Amd => &mut self.amd,
            GpuVendor::Intel => &mut self.intel,
        }
    }

    /// Classify controller names by vendor. The first matching controller
    /// per vendor wins.
    pub fn from_controllers<S: AsRef<str>>(controllers: &[S]) -> Self {
        let mut set = Self::default();
        for vendor in GpuVendor::PREFERENCE {
            if let Some(name) = controllers.iter().find(|c| vendor.matches(c.as_ref())) {
                *set.get_mut(vendor) = GpuInfo::present(name.as_ref().trim());
            }
        }
        set
    }
}

/// Bytes of RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
}

/// Immutable description of the host, captured by detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSnapshot {
    pub cpu: CpuInfo,
    pub gpu: GpuSet,
    pub memory: MemoryInfo,
    /// Operating system identifier (`linux`, `macos`, `windows`, ...).
    pub platform: String,
}

impl HardwareSnapshot {
    /// Whether any vendor's GPU can be used for hardware acceleration.
    pub fn has_gpu(&self) -> bool {
        self.best_gpu().is_some()
    }

    /// The preferred available vendor: NVIDIA, then AMD, then Intel.
    pub fn best_gpu(&self) -> Option<GpuVendor> {
        GpuVendor::PREFERENCE
            .into_iter()
            .find(|v| self.gpu.get(*v).available)
    }

    /// A copy with every GPU marked unavailable.
    pub fn cpu_only(&self) -> Self {
        Self {
            gpu: GpuSet::default(),
            ..self.clone()
        }
    }

    /// Whole gibibytes of total memory.
    pub fn total_memory_gb(&self) -> u64 {
        self.memory.total / GIB
    }

    /// Conservative snapshot built from what the OS reports without probing:
    /// logical CPU count for both cores and threads, no GPU.
    pub fn fallback(memory: MemoryInfo) -> Self {
        let logical = num_cpus::get().max(1);
        Self {
            cpu: CpuInfo {
                cores: logical,
                threads: logical,
                model: "Unknown CPU".into(),
            },
            gpu: GpuSet::default(),
            memory,
            platform: std::env::consts::OS.into(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Snapshot with the given cores, GPUs, and total memory (all available).
    pub(crate) fn snapshot(cores: usize, gpu: GpuSet, memory_gb: u64) -> HardwareSnapshot {
        HardwareSnapshot {
            cpu: CpuInfo {
                cores,
                threads: cores * 2,
                model: "Test CPU".into(),
            },
            gpu,
            memory: MemoryInfo {
                total: memory_gb * GIB,
                available: memory_gb * GIB,
            },
            platform: "linux".into(),
        }
    }

    #[test]
    fn vendor_keywords() {
        assert!(GpuVendor::Nvidia.matches("NVIDIA Corporation GA102 [GeForce RTX 3080]"));
        assert!(GpuVendor::Nvidia.matches("Quadro P2000"));
        assert!(GpuVendor::Amd.matches("Advanced Micro Devices, Inc. [AMD/ATI] Navi 21"));
        assert!(GpuVendor::Amd.matches("Radeon Pro 560X"));
        assert!(GpuVendor::Intel.matches("Intel(R) UHD Graphics 630"));
        assert!(GpuVendor::Intel.matches("Iris Plus Graphics"));
        assert!(!GpuVendor::Amd.matches("NVIDIA Corporation"));
        assert!(!GpuVendor::Intel.matches("Radeon RX 580"));
    }

    #[test]
    fn classify_controllers() {
        let set = GpuSet::from_controllers(&[
            "Intel Corporation UHD Graphics 620",
            "NVIDIA Corporation GP107M [GeForce MX150]",
        ]);
        assert!(set.nvidia.available);
        assert!(set.intel.available);
        assert!(!set.amd.available);
        assert_eq!(
            set.nvidia.model.as_deref(),
            Some("NVIDIA Corporation GP107M [GeForce MX150]")
        );
    }

    #[test]
    fn best_gpu_follows_preference() {
        let set = GpuSet {
            nvidia: GpuInfo::default(),
            amd: GpuInfo::present("Radeon"),
            intel: GpuInfo::present("Intel UHD"),
        };
        let snap = snapshot(8, set, 16);
        assert!(snap.has_gpu());
        assert_eq!(snap.best_gpu(), Some(GpuVendor::Amd));
        assert_eq!(snap.best_gpu().map(|v| v.encoder()), Some(EncoderFamily::Amf));
    }

    #[test]
    fn cpu_only_strips_gpus() {
        let set = GpuSet::from_controllers(&["GeForce GTX 1060"]);
        let snap = snapshot(4, set, 8);
        let stripped = snap.cpu_only();
        assert!(!stripped.has_gpu());
        assert_eq!(stripped.cpu, snap.cpu);
        assert!(snap.has_gpu());
    }

    #[test]
    fn fallback_has_no_gpu() {
        let snap = HardwareSnapshot::fallback(MemoryInfo {
            total: 4 * GIB,
            available: GIB,
        });
        assert!(!snap.has_gpu());
        assert!(snap.cpu.cores >= 1);
        assert_eq!(snap.cpu.cores, snap.cpu.threads);
        assert_eq!(snap.total_memory_gb(), 4);
    }

    #[test]
    fn snapshot_serializes() {
        let snap = snapshot(2, GpuSet::default(), 4);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["cpu"]["cores"], 2);
        assert_eq!(json["gpu"]["nvidia"]["available"], false);
    }
}
