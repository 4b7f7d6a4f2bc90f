//! Human-readable formatting for sizes, durations, bitrates, and job
//! progress lines.

use std::path::Path;

use mf_core::{JobStatus, JobUpdate};

const KIB: f64 = 1024.0;

/// Format a byte count with binary units: `512 B`, `1.50 KB`, `3.21 GB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= KIB && unit < UNITS.len() - 1 {
        value /= KIB;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Format seconds as `MM:SS`, or `HH:MM:SS` from one hour up.
pub fn format_duration(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.floor() as u64
    } else {
        0
    };
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Format bits per second as `bps`, `Kbps`, or `Mbps`.
pub fn format_bitrate(bps: u64) -> String {
    if bps >= 1_000_000 {
        format!("{:.1} Mbps", bps as f64 / 1_000_000.0)
    } else if bps >= 1_000 {
        format!("{:.0} Kbps", bps as f64 / 1_000.0)
    } else {
        format!("{bps} bps")
    }
}

/// One console line describing a job update.
///
/// ```text
/// [ 42.0%] song.wav  running  2.5x  ETA 1m 3s
/// [100.0%] song.wav  completed
/// [  0.0%] bad.wav   failed: Input file not found
/// ```
pub fn progress_line(update: &JobUpdate, input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());

    let mut line = format!("[{:>5.1}%] {name}  {}", update.progress, update.status);

    match update.status {
        JobStatus::Failed | JobStatus::Cancelled => {
            if let Some(ref error) = update.error {
                line.push_str(&format!(": {error}"));
            }
        }
        JobStatus::Running | JobStatus::Paused => {
            if let Some(speed) = update.speed {
                line.push_str(&format!("  {speed:.1}x"));
            }
            if let Some(eta) = update.eta {
                line.push_str(&format!("  ETA {eta}"));
            }
        }
        _ => {}
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::{Eta, JobId};

    #[test]
    fn sizes() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(50 * 1024 * 1024), "50.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
        assert_eq!(format_size(2 * 1024u64.pow(4)), "2.00 TB");
        assert_eq!(format_size(2048 * 1024u64.pow(4)), "2048.00 TB");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(0.0), "00:00");
        assert_eq!(format_duration(59.9), "00:59");
        assert_eq!(format_duration(215.64), "03:35");
        assert_eq!(format_duration(3600.0), "01:00:00");
        assert_eq!(format_duration(7384.0), "02:03:04");
        assert_eq!(format_duration(f64::NAN), "00:00");
    }

    #[test]
    fn bitrates() {
        assert_eq!(format_bitrate(800), "800 bps");
        assert_eq!(format_bitrate(192_017), "192 Kbps");
        assert_eq!(format_bitrate(5_000_000), "5.0 Mbps");
    }

    #[test]
    fn running_line_shows_speed_and_eta() {
        let update = JobUpdate {
            speed: Some(2.5),
            eta: Some(Eta::Remaining(63)),
            ..JobUpdate::status(JobId::new(), JobStatus::Running, 42.0)
        };
        assert_eq!(
            progress_line(&update, Path::new("/music/song.wav")),
            "[ 42.0%] song.wav  running  2.5x  ETA 1m 3s"
        );
    }

    #[test]
    fn failed_line_shows_error() {
        let update = JobUpdate::status(JobId::new(), JobStatus::Failed, 0.0)
            .with_error("Input file not found");
        assert_eq!(
            progress_line(&update, Path::new("bad.wav")),
            "[  0.0%] bad.wav  failed: Input file not found"
        );
    }
}
