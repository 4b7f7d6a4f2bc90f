//! Parsing ffmpeg's diagnostic stream into progress samples.
//!
//! ffmpeg prints an input `Duration: HH:MM:SS.ff` line once, then reports
//! progress in two forms: carriage-return terminated stats lines
//! (`frame=… time=HH:MM:SS.ff … speed=N.Nx`) and, with `-progress pipe:2`,
//! key/value blocks (`out_time=…` followed later by `speed=…x`). Both forms
//! produce samples. Nothing is emitted until the total duration is known.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2}\.\d{2})").unwrap());
static STATS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d{2}):(\d{2}):(\d{2}\.\d{2}).+speed=\s*(\d+\.?\d*)x").unwrap()
});
static OUT_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^out_time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)$").unwrap());
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^speed=\s*(\d+\.?\d*)x$").unwrap());

/// One progress observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    /// Encoding speed as a multiple of real time, when reported.
    pub speed: Option<f64>,
    /// Output timestamp reached, in seconds.
    pub current_secs: f64,
}

/// Stateful line parser for one ffmpeg run.
#[derive(Debug, Default)]
pub struct ProgressParser {
    total_secs: Option<f64>,
    /// `out_time` seen in the current key/value block, awaiting `speed`.
    pending_out_time: Option<f64>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total input duration, once the duration marker has been seen.
    pub fn total_secs(&self) -> Option<f64> {
        self.total_secs
    }

    /// Feed one diagnostic line; returns a sample when the line completes a
    /// progress observation.
    pub fn feed(&mut self, line: &str) -> Option<ProgressSample> {
        let line = line.trim();

        if self.total_secs.is_none() {
            if let Some(caps) = DURATION_RE.captures(line) {
                let total = hms_to_secs(&caps[1], &caps[2], &caps[3])?;
                if total > 0.0 {
                    tracing::debug!(total_secs = total, "Input duration");
                    self.total_secs = Some(total);
                }
                return None;
            }
        }

        if let Some(caps) = STATS_RE.captures(line) {
            let current = hms_to_secs(&caps[1], &caps[2], &caps[3])?;
            let speed = caps[4].parse::<f64>().ok();
            return self.sample(current, speed);
        }

        if let Some(caps) = OUT_TIME_RE.captures(line) {
            self.pending_out_time = hms_to_secs(&caps[1], &caps[2], &caps[3]);
            return None;
        }

        if line.starts_with("speed=") {
            let current = self.pending_out_time.take()?;
            let speed = SPEED_RE
                .captures(line)
                .and_then(|caps| caps[1].parse::<f64>().ok());
            return self.sample(current, speed);
        }

        None
    }

    fn sample(&self, current_secs: f64, speed: Option<f64>) -> Option<ProgressSample> {
        let total = self.total_secs?;
        Some(ProgressSample {
            progress: (current_secs / total * 100.0).clamp(0.0, 100.0),
            speed,
            current_secs,
        })
    }
}

fn hms_to_secs(h: &str, m: &str, s: &str) -> Option<f64> {
    let h: f64 = h.parse().ok()?;
    let m: f64 = m.parse().ok()?;
    let s: f64 = s.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DURATION_LINE: &str =
        "  Duration: 00:01:40.00, start: 0.000000, bitrate: 128 kb/s";

    #[test]
    fn no_samples_before_duration() {
        let mut p = ProgressParser::new();
        assert_eq!(
            p.feed("size=  256kB time=00:00:10.00 bitrate= 209.7kbits/s speed=20.1x"),
            None
        );
        assert_eq!(p.total_secs(), None);
    }

    #[test]
    fn stats_line_sample() {
        let mut p = ProgressParser::new();
        assert_eq!(p.feed(DURATION_LINE), None);
        assert_eq!(p.total_secs(), Some(100.0));

        let s = p
            .feed("size=  256kB time=00:00:25.00 bitrate= 209.7kbits/s speed=20.1x")
            .unwrap();
        assert!((s.progress - 25.0).abs() < 1e-9);
        assert_eq!(s.speed, Some(20.1));
        assert_eq!(s.current_secs, 25.0);
    }

    #[test]
    fn progress_is_capped_at_100() {
        let mut p = ProgressParser::new();
        p.feed(DURATION_LINE);
        let s = p.feed("frame=1 time=00:02:00.00 bitrate=1k speed=1.0x").unwrap();
        assert_eq!(s.progress, 100.0);
    }

    #[test]
    fn key_value_block_sample() {
        let mut p = ProgressParser::new();
        p.feed(DURATION_LINE);
        assert_eq!(p.feed("out_time_us=50000000"), None);
        assert_eq!(p.feed("out_time=00:00:50.000000"), None);
        assert_eq!(p.feed("dup_frames=0"), None);
        let s = p.feed("speed=3.5x").unwrap();
        assert!((s.progress - 50.0).abs() < 1e-9);
        assert_eq!(s.speed, Some(3.5));
        // The pending out_time is consumed.
        assert_eq!(p.feed("speed=3.5x"), None);
    }

    #[test]
    fn key_value_na_speed() {
        let mut p = ProgressParser::new();
        p.feed(DURATION_LINE);
        p.feed("out_time=00:00:10.000000");
        let s = p.feed("speed=N/A").unwrap();
        assert_eq!(s.speed, None);
        assert!((s.progress - 10.0).abs() < 1e-9);
    }

    #[test]
    fn negative_out_time_is_ignored() {
        let mut p = ProgressParser::new();
        p.feed(DURATION_LINE);
        assert_eq!(p.feed("out_time=-577014:32:22.775808"), None);
        assert_eq!(p.feed("speed=N/A"), None);
    }

    #[test]
    fn later_duration_lines_do_not_reset_total() {
        let mut p = ProgressParser::new();
        p.feed(DURATION_LINE);
        p.feed("  Duration: 00:00:10.00, start: 0.000000");
        assert_eq!(p.total_secs(), Some(100.0));
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        let mut p = ProgressParser::new();
        p.feed(DURATION_LINE);
        assert_eq!(p.feed("Stream #0:0: Audio: mp3, 44100 Hz, stereo"), None);
        assert_eq!(p.feed(""), None);
    }
}
