//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! scheduler, tool, and event sub-configs. Every section defaults sensibly
//! so a completely empty `{}` file is valid. A handful of `MEDIAFORGE_*`
//! environment variables can override the scheduler settings after loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

/// Lower bound for the number of concurrently running jobs.
pub const MIN_CONCURRENT_JOBS: usize = 1;
/// Upper bound for the number of concurrently running jobs.
pub const MAX_CONCURRENT_JOBS: usize = 8;

/// Environment variable overriding `scheduler.max_concurrent_jobs`.
pub const ENV_MAX_CONCURRENT_JOBS: &str = "MEDIAFORGE_MAX_CONCURRENT_JOBS";
/// Environment variable overriding `scheduler.gpu_acceleration`.
pub const ENV_GPU_ACCELERATION: &str = "MEDIAFORGE_GPU_ACCELERATION";
/// Environment variable overriding `scheduler.auto_detect_hardware`.
pub const ENV_AUTO_DETECT_HARDWARE: &str = "MEDIAFORGE_AUTO_DETECT_HARDWARE";
/// Environment variable overriding `scheduler.output_dir`.
pub const ENV_OUTPUT_DIR: &str = "MEDIAFORGE_OUTPUT_DIR";

/// Clamp a requested concurrency to the supported range.
pub fn clamp_concurrency(n: usize) -> usize {
    n.clamp(MIN_CONCURRENT_JOBS, MAX_CONCURRENT_JOBS)
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub tools: ToolsConfig,
    pub events: EventsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Configuration(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None`, the file does not exist, or it cannot be parsed.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Apply `MEDIAFORGE_*` overrides from the process environment.
    ///
    /// Values that cannot be parsed are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using an arbitrary lookup function.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_JOBS) {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.scheduler.max_concurrent_jobs = n,
                Err(_) => tracing::warn!("Ignoring {ENV_MAX_CONCURRENT_JOBS}={raw:?}: not an integer"),
            }
        }

        if let Some(raw) = lookup(ENV_GPU_ACCELERATION) {
            match parse_bool(&raw) {
                Some(b) => self.scheduler.gpu_acceleration = b,
                None => tracing::warn!("Ignoring {ENV_GPU_ACCELERATION}={raw:?}: not a boolean"),
            }
        }

        if let Some(raw) = lookup(ENV_AUTO_DETECT_HARDWARE) {
            match parse_bool(&raw) {
                Some(b) => self.scheduler.auto_detect_hardware = b,
                None => {
                    tracing::warn!("Ignoring {ENV_AUTO_DETECT_HARDWARE}={raw:?}: not a boolean")
                }
            }
        }

        if let Some(raw) = lookup(ENV_OUTPUT_DIR) {
            let trimmed = raw.trim();
            self.scheduler.output_dir = if trimmed.is_empty() {
                None
            } else {
                Some(PathBuf::from(trimmed))
            };
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let requested = self.scheduler.max_concurrent_jobs;
        if !(MIN_CONCURRENT_JOBS..=MAX_CONCURRENT_JOBS).contains(&requested) {
            warnings.push(format!(
                "scheduler.max_concurrent_jobs {requested} is outside [{MIN_CONCURRENT_JOBS}, {MAX_CONCURRENT_JOBS}]; it will be clamped to {}",
                clamp_concurrency(requested)
            ));
        }

        if self.scheduler.auto_detect_hardware && requested != default_max_concurrent_jobs() {
            warnings.push(
                "scheduler.max_concurrent_jobs is ignored while auto_detect_hardware is enabled"
                    .into(),
            );
        }

        if self.scheduler.tick_interval_ms == 0 {
            warnings.push("scheduler.tick_interval_ms is 0; using 1ms".into());
        }

        if let Some(ref dir) = self.scheduler.output_dir {
            if dir.exists() && !dir.is_dir() {
                warnings.push(format!(
                    "scheduler.output_dir {} exists but is not a directory",
                    dir.display()
                ));
            }
        }

        for (name, path) in [
            ("ffmpeg_path", &self.tools.ffmpeg_path),
            ("ffprobe_path", &self.tools.ffprobe_path),
        ] {
            if let Some(p) = path {
                if !p.exists() {
                    warnings.push(format!("tools.{name} {} does not exist", p.display()));
                }
            }
        }

        if self.events.capacity == 0 {
            warnings.push("events.capacity is 0; using 1".into());
        }

        warnings
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Job scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Requested concurrency when hardware auto-detection is off.
    pub max_concurrent_jobs: usize,
    pub gpu_acceleration: bool,
    /// Derive concurrency from the hardware snapshot instead of
    /// `max_concurrent_jobs`.
    pub auto_detect_hardware: bool,
    /// Where outputs go when a job does not name one. `None` writes next to
    /// the input.
    pub output_dir: Option<PathBuf>,
    /// Period of the admission tick while work remains.
    pub tick_interval_ms: u64,
}

impl SchedulerConfig {
    /// Configured concurrency clamped to the supported range.
    pub fn effective_max_concurrent_jobs(&self) -> usize {
        clamp_concurrency(self.max_concurrent_jobs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            gpu_acceleration: true,
            auto_detect_hardware: true,
            output_dir: None,
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_tick_interval_ms() -> u64 {
    250
}

/// Paths to external CLI tools. Unset paths are looked up on `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Job event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity; slow subscribers lag past this.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}
