//! Hardware-aware tuning heuristics.
//!
//! Everything here is a pure function of a [`HardwareSnapshot`] and the job's
//! parameters, so identical inputs always produce identical outputs.

use serde::{Deserialize, Serialize};

use mf_core::{EncoderFamily, ExecutionConfig, MediaDescriptor, OutputFormat, Preset, Quality};

use crate::snapshot::HardwareSnapshot;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Hard cap on recommended concurrency regardless of machine size.
const MAX_RECOMMENDED_JOBS: u64 = 4;
/// Upper bound on encoder threads per job.
const MAX_THREADS: usize = 16;

/// Derive the execution config for a job of `file_size` bytes converting to
/// `format` on the described host.
pub fn derive_config(
    snapshot: &HardwareSnapshot,
    file_size: u64,
    format: OutputFormat,
) -> ExecutionConfig {
    let cores = snapshot.cpu.cores;

    let encoder = if format.is_audio_only() {
        EncoderFamily::Software
    } else {
        snapshot
            .best_gpu()
            .map(|vendor| vendor.encoder())
            .unwrap_or(EncoderFamily::Software)
    };

    let config = ExecutionConfig {
        preset: preset_for(file_size, cores),
        threads: (cores * 3 / 4).clamp(1, MAX_THREADS),
        enable_gpu: encoder.is_hardware(),
        encoder,
        buffer_size: buffer_size_for(file_size, snapshot.memory.available),
        audio_codec: audio_codec_for(format).into(),
        video_codec: video_codec_for(format, encoder).map(String::from),
    };

    tracing::debug!(?config, file_size, %format, "Derived execution config");
    config
}

fn preset_for(file_size: u64, cores: usize) -> Preset {
    if file_size > GIB {
        if cores >= 8 {
            Preset::Medium
        } else {
            Preset::Fast
        }
    } else if file_size > 100 * MIB {
        if cores >= 4 {
            Preset::Medium
        } else {
            Preset::Fast
        }
    } else {
        Preset::Fast
    }
}

/// `min(25% of available memory, size tier)`; unknown (zero) available
/// memory leaves the tier as-is.
fn buffer_size_for(file_size: u64, available_memory: u64) -> u64 {
    let tier = if file_size < 500 * MIB {
        16 * MIB
    } else if file_size < 2 * GIB {
        32 * MIB
    } else {
        64 * MIB
    };
    if available_memory == 0 {
        tier
    } else {
        tier.min(available_memory / 4)
    }
}

fn audio_codec_for(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Mp3 => "libmp3lame",
        OutputFormat::Mp4 | OutputFormat::Aac => "aac",
        OutputFormat::Wav => "pcm_s16le",
    }
}

fn video_codec_for(format: OutputFormat, encoder: EncoderFamily) -> Option<&'static str> {
    if format.is_audio_only() {
        return None;
    }
    Some(match encoder {
        EncoderFamily::Nvenc => "h264_nvenc",
        EncoderFamily::Amf => "h264_amf",
        EncoderFamily::Qsv => "h264_qsv",
        EncoderFamily::Software => "libx264",
    })
}

/// `clamp(1, 4, min(cores / 2, total_memory_gb / 2))`.
pub fn recommended_concurrency(snapshot: &HardwareSnapshot) -> usize {
    let by_cores = snapshot.cpu.cores as u64 / 2;
    let by_memory = snapshot.total_memory_gb() / 2;
    by_cores.min(by_memory).clamp(1, MAX_RECOMMENDED_JOBS) as usize
}

// ---------------------------------------------------------------------------
// Estimate
// ---------------------------------------------------------------------------

/// Rough prediction of how long a conversion takes and how big its output is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionEstimate {
    /// Wall-clock seconds.
    pub duration_secs: f64,
    /// Output size in bytes.
    pub output_size: u64,
    pub config: ExecutionConfig,
}

/// Estimate a conversion of `source` to `format` at `quality`.
pub fn estimate(
    snapshot: &HardwareSnapshot,
    source: &MediaDescriptor,
    format: OutputFormat,
    quality: Quality,
) -> ConversionEstimate {
    let config = derive_config(snapshot, source.size, format);

    let gpu_factor = if config.enable_gpu { 3.0 } else { 1.0 };
    let preset_factor = match config.preset {
        Preset::Ultrafast => 4.0,
        Preset::Fast => 2.0,
        Preset::Medium => 1.5,
        Preset::Slow => 0.8,
    };
    let speed = gpu_factor * preset_factor;

    let ratio = match (format, quality) {
        (OutputFormat::Mp3, _) => 0.1,
        (OutputFormat::Mp4, Quality::Low) => 0.3,
        (OutputFormat::Mp4, Quality::Medium) => 0.5,
        (OutputFormat::Mp4, Quality::High) => 0.7,
        (OutputFormat::Mp4, Quality::Ultra) => 0.9,
        _ => 1.0,
    };

    ConversionEstimate {
        duration_secs: source.duration_secs / speed,
        output_size: (source.size as f64 * ratio) as u64,
        config,
    }
}
