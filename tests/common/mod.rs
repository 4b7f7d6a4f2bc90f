//! Shared helpers for the root integration tests.
//!
//! Conversions run against small shell scripts standing in for ffmpeg and
//! ffprobe, so these tests need a unix shell.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use mf_core::Config;
use tempfile::TempDir;

/// ffmpeg stand-in: prints a version line, fails like ffmpeg on a missing
/// input, otherwise reports progress in `-progress` form and creates the
/// output (its last argument).
const FAKE_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  echo "ffmpeg version 6.1-test Copyright (c) 2000-2023 the FFmpeg developers"
  exit 0
fi
input=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
done
if [ ! -f "$input" ]; then
  echo "$input: No such file or directory" >&2
  exit 1
fi
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1411 kb/s" >&2
echo "out_time=00:00:05.000000" >&2
echo "speed=2.0x" >&2
echo "out_time=00:00:10.000000" >&2
echo "speed=2.0x" >&2
touch "$prev"
exit 0
"#;

/// ffprobe stand-in describing every existing file as ten seconds of PCM
/// audio in a wav container.
const FAKE_FFPROBE: &str = r#"#!/bin/sh
for arg in "$@"; do file="$arg"; done
if [ ! -f "$file" ]; then
  exit 1
fi
cat <<'EOF'
{
  "format": {
    "format_name": "wav",
    "duration": "10.000000",
    "size": "1764044",
    "bit_rate": "1411200"
  },
  "streams": [
    { "codec_type": "audio", "codec_name": "pcm_s16le" }
  ]
}
EOF
"#;

/// A temp directory holding fake tools, source media, and a config file.
pub struct Workspace {
    pub dir: TempDir,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", FAKE_FFMPEG);
        let ffprobe = write_script(dir.path(), "ffprobe", FAKE_FFPROBE);
        Self {
            dir,
            ffmpeg,
            ffprobe,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a small source file and return its path.
    pub fn media(&self, name: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        path
    }

    /// Config pointing at the fake tools with a fixed concurrency of 2.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.tools.ffmpeg_path = Some(self.ffmpeg.clone());
        config.tools.ffprobe_path = Some(self.ffprobe.clone());
        config.scheduler.max_concurrent_jobs = 2;
        config.scheduler.auto_detect_hardware = false;
        config.scheduler.gpu_acceleration = false;
        config.scheduler.tick_interval_ms = 10;
        config
    }

    /// Write [`Workspace::config`] as JSON and return the file path.
    pub fn config_file(&self) -> PathBuf {
        let path = self.path().join("mediaforge.json");
        std::fs::write(&path, serde_json::to_string_pretty(&self.config()).unwrap()).unwrap();
        path
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
