//! Media-domain types: target formats, quality tiers, job status, encoder
//! families, execution configs, and the source-media descriptor produced by
//! probing.
//!
//! Enums serialize in lowercase and implement `Display` manually so the
//! string form used on the command line, in config, and in events is the
//! same everywhere.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::Error;

// ---------------------------------------------------------------------------
// OutputFormat
// ---------------------------------------------------------------------------

/// Target container/format of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp3,
    Mp4,
    Wav,
    Aac,
}

impl OutputFormat {
    /// All supported formats, in display order.
    pub const ALL: [OutputFormat; 4] = [Self::Mp3, Self::Mp4, Self::Wav, Self::Aac];

    /// Formats that carry no video stream.
    pub fn is_audio_only(&self) -> bool {
        !matches!(self, Self::Mp4)
    }

    /// File extension (without the dot) for outputs of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Mp4 => "mp4",
            Self::Wav => "wav",
            Self::Aac => "aac",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "mp4" => Ok(Self::Mp4),
            "wav" => Ok(Self::Wav),
            "aac" => Ok(Self::Aac),
            other => Err(Error::configuration(format_args!(
                "unknown output format '{other}' (expected mp3, mp4, wav or aac)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Quality
// ---------------------------------------------------------------------------

/// Quality tier selecting bitrates and, for video, a constant rate factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
    Ultra,
}

impl Quality {
    /// Audio bitrate as an ffmpeg bitrate string.
    pub fn audio_bitrate(&self) -> &'static str {
        match self {
            Self::Low => "128k",
            Self::Medium => "192k",
            Self::High => "256k",
            Self::Ultra => "320k",
        }
    }

    /// Video bitrate as an ffmpeg bitrate string.
    pub fn video_bitrate(&self) -> &'static str {
        match self {
            Self::Low => "1000k",
            Self::Medium => "2500k",
            Self::High => "5000k",
            Self::Ultra => "8000k",
        }
    }

    /// Constant rate factor applied on top of the bitrate for the upper tiers.
    pub fn crf(&self) -> Option<u8> {
        match self {
            Self::High => Some(23),
            Self::Ultra => Some(18),
            Self::Low | Self::Medium => None,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Ultra => write!(f, "ultra"),
        }
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "ultra" => Ok(Self::Ultra),
            other => Err(Error::configuration(format_args!(
                "unknown quality '{other}' (expected low, medium, high or ultra)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    /// Still executing underneath, but the scheduler is globally paused.
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether the job has reached one of its three end states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the job currently occupies a running slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Queued | Cancelled) => true,
            (Queued, Running | Cancelled) => true,
            (Running, Paused | Completed | Failed | Cancelled) => true,
            // A paused job's process keeps running, so it may finish while
            // paused or be relabelled on resume.
            (Paused, Queued | Running | Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// EncoderFamily
// ---------------------------------------------------------------------------

/// Which encoder implementation a job uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderFamily {
    /// CPU encoding (libx264 and the audio encoders).
    Software,
    /// NVIDIA NVENC.
    Nvenc,
    /// AMD AMF.
    Amf,
    /// Intel Quick Sync.
    Qsv,
}

impl EncoderFamily {
    pub fn is_hardware(&self) -> bool {
        !matches!(self, Self::Software)
    }
}

impl fmt::Display for EncoderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Software => write!(f, "software"),
            Self::Nvenc => write!(f, "nvenc"),
            Self::Amf => write!(f, "amf"),
            Self::Qsv => write!(f, "qsv"),
        }
    }
}

// ---------------------------------------------------------------------------
// Preset
// ---------------------------------------------------------------------------

/// Encoder speed/quality trade-off, named as ffmpeg's x264 presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Fast,
    Medium,
    Slow,
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ultrafast => write!(f, "ultrafast"),
            Self::Fast => write!(f, "fast"),
            Self::Medium => write!(f, "medium"),
            Self::Slow => write!(f, "slow"),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionConfig
// ---------------------------------------------------------------------------

/// Tuning parameters for one job's transcoder invocation. Derived per job
/// from the hardware snapshot and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub preset: Preset,
    pub threads: usize,
    pub enable_gpu: bool,
    pub encoder: EncoderFamily,
    /// I/O buffer size in bytes.
    pub buffer_size: u64,
    pub audio_codec: String,
    /// `None` for audio-only targets.
    pub video_codec: Option<String>,
}

impl Default for ExecutionConfig {
    /// Conservative settings for when no hardware snapshot is available.
    fn default() -> Self {
        Self {
            preset: Preset::Fast,
            threads: 2,
            enable_gpu: false,
            encoder: EncoderFamily::Software,
            buffer_size: 16 * 1024 * 1024,
            audio_codec: "aac".into(),
            video_codec: Some("libx264".into()),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaDescriptor
// ---------------------------------------------------------------------------

/// Frame rate as reported by the prober, kept as a rational.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    /// Frames per second, or 0 when the denominator is 0.
    pub fn fps(&self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            f64::from(self.numerator) / f64::from(self.denominator)
        }
    }
}

/// Everything known about a source file before it is converted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub path: PathBuf,
    /// Duration in seconds (0 when unknown).
    pub duration_secs: f64,
    /// Container format name as reported by the prober.
    pub container: String,
    /// File size in bytes.
    pub size: u64,
    /// Overall bitrate in bits per second.
    pub bitrate: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: FrameRate,
    pub has_audio: bool,
    pub has_video: bool,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

impl MediaDescriptor {
    /// `WIDTHxHEIGHT` when both dimensions are known.
    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{w}x{h}")),
            _ => None,
        }
    }
}
