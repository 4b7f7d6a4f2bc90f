//! FFprobe-backed media inspection.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps the JSON output into a [`MediaDescriptor`].

use std::path::Path;
use std::time::Duration;

use mf_core::{Error, FrameRate, MediaDescriptor, Result};
use serde::Deserialize;

use crate::command::ToolCommand;

/// How long ffprobe may take before the probe fails.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Inspect `path` with the ffprobe binary at `ffprobe`.
///
/// Fails with [`Error::Probe`] on a non-zero exit, malformed output, or
/// timeout.
pub async fn probe_file(ffprobe: &Path, path: &Path) -> Result<MediaDescriptor> {
    let mut cmd = ToolCommand::new(ffprobe.to_path_buf());
    cmd.timeout(PROBE_TIMEOUT);
    cmd.args([
        "-v", "quiet",
        "-print_format", "json",
        "-show_format",
        "-show_streams",
    ]);
    cmd.arg(path.to_string_lossy().as_ref());

    let output = cmd.execute().await.map_err(|e| match e {
        Error::Tool { message, .. } => {
            Error::Probe(format!("ffprobe failed for {}: {message}", path.display()))
        }
        other => other,
    })?;

    parse_probe_output(path, &output.stdout)
}

/// Parse ffprobe's JSON document for `path`.
pub fn parse_probe_output(path: &Path, json: &str) -> Result<MediaDescriptor> {
    let ff: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let video = ff
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = ff
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(MediaDescriptor {
        path: path.to_path_buf(),
        duration_secs: parse_number(ff.format.duration.as_deref()).unwrap_or(0.0),
        container: ff
            .format
            .format_name
            .clone()
            .unwrap_or_else(|| "unknown".into()),
        size: parse_number(ff.format.size.as_deref()).map_or(0, |n| n as u64),
        bitrate: parse_number(ff.format.bit_rate.as_deref()).map_or(0, |n| n as u64),
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        frame_rate: video
            .and_then(|v| v.r_frame_rate.as_deref())
            .map(parse_frame_rate)
            .unwrap_or_default(),
        has_audio: audio.is_some(),
        has_video: video.is_some(),
        video_codec: video.and_then(|v| v.codec_name.clone()),
        audio_codec: audio.and_then(|a| a.codec_name.clone()),
    })
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_number(s: Option<&str>) -> Option<f64> {
    s.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n >= 0.0)
}

/// Parse `"num/den"` (or a bare integer) into a [`FrameRate`]. Anything
/// unparsable yields `0/0`.
fn parse_frame_rate(s: &str) -> FrameRate {
    let parsed = match s.split_once('/') {
        Some((num, den)) => num
            .trim()
            .parse::<u32>()
            .ok()
            .zip(den.trim().parse::<u32>().ok()),
        None => s.trim().parse::<u32>().ok().map(|n| (n, 1)),
    };
    match parsed {
        Some((numerator, denominator)) => FrameRate {
            numerator,
            denominator,
        },
        None => FrameRate::default(),
    }
}
