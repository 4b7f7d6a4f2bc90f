//! Deterministic ffmpeg argument construction.
//!
//! The argument list depends only on the input/output paths, the target
//! format, the quality tier, and the job's [`ExecutionConfig`]. Hardware
//! acceleration flags are emitted only when the config enables the GPU, and
//! they precede `-i` so ffmpeg applies them to the input.

use std::path::Path;

use mf_core::{EncoderFamily, ExecutionConfig, OutputFormat, Quality};

/// Sample rate for the PCM-style audio targets.
const AUDIO_SAMPLE_RATE: &str = "44100";
/// Channel count for the PCM-style audio targets.
const AUDIO_CHANNELS: &str = "2";

/// `-hwaccel` flags for an encoder family. Empty for software encoding.
pub fn hwaccel_args(encoder: EncoderFamily) -> &'static [&'static str] {
    match encoder {
        EncoderFamily::Nvenc => &["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"],
        EncoderFamily::Qsv => &["-hwaccel", "qsv"],
        EncoderFamily::Amf => &["-hwaccel", "d3d11va"],
        EncoderFamily::Software => &[],
    }
}

/// Build the full ffmpeg argument list. The output path is always last.
pub fn build_args(
    input: &Path,
    output: &Path,
    format: OutputFormat,
    quality: Quality,
    config: &ExecutionConfig,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-progress".into(), "pipe:2".into()];

    if config.enable_gpu {
        args.extend(hwaccel_args(config.encoder).iter().map(|s| s.to_string()));
    }

    args.push("-i".into());
    args.push(input.to_string_lossy().into_owned());

    args.push("-threads".into());
    args.push(config.threads.to_string());

    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    match format {
        OutputFormat::Mp3 => {
            let codec = non_empty(&config.audio_codec).unwrap_or("libmp3lame");
            push(&["-vn", "-acodec", codec, "-ab", quality.audio_bitrate()]);
            push(&["-ar", AUDIO_SAMPLE_RATE, "-ac", AUDIO_CHANNELS]);
        }
        OutputFormat::Mp4 => {
            match config.video_codec.as_deref().filter(|_| config.enable_gpu) {
                Some(codec) => push(&["-c:v", codec]),
                None => {
                    let preset = config.preset.to_string();
                    push(&["-c:v", "libx264", "-preset", &preset]);
                }
            }
            let audio = non_empty(&config.audio_codec).unwrap_or("aac");
            push(&["-c:a", audio]);
            push(&["-b:v", quality.video_bitrate(), "-b:a", quality.audio_bitrate()]);
            if let Some(crf) = quality.crf() {
                let crf = crf.to_string();
                push(&["-crf", &crf]);
            }
        }
        OutputFormat::Wav => {
            push(&["-vn", "-acodec", "pcm_s16le"]);
            push(&["-ar", AUDIO_SAMPLE_RATE, "-ac", AUDIO_CHANNELS]);
        }
        OutputFormat::Aac => {
            push(&["-vn", "-acodec", "aac", "-ab", quality.audio_bitrate()]);
        }
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::Preset;

    fn software(audio_codec: &str, video_codec: Option<&str>) -> ExecutionConfig {
        ExecutionConfig {
            preset: Preset::Fast,
            threads: 6,
            enable_gpu: false,
            encoder: EncoderFamily::Software,
            buffer_size: 16 << 20,
            audio_codec: audio_codec.into(),
            video_codec: video_codec.map(String::from),
        }
    }

    fn args(format: OutputFormat, quality: Quality, cfg: &ExecutionConfig) -> Vec<String> {
        build_args(Path::new("/in/a.mkv"), Path::new("/out/a.x"), format, quality, cfg)
    }

    #[test]
    fn mp3_args() {
        let cfg = software("libmp3lame", None);
        assert_eq!(
            args(OutputFormat::Mp3, Quality::High, &cfg),
            [
                "-y", "-progress", "pipe:2", "-i", "/in/a.mkv", "-threads", "6", "-vn",
                "-acodec", "libmp3lame", "-ab", "256k", "-ar", "44100", "-ac", "2", "/out/a.x",
            ]
        );
    }

    #[test]
    fn mp4_software_uses_libx264_with_preset_and_crf() {
        let cfg = software("aac", Some("libx264"));
        let a = args(OutputFormat::Mp4, Quality::Ultra, &cfg);
        assert_eq!(
            a[7..],
            [
                "-c:v", "libx264", "-preset", "fast", "-c:a", "aac", "-b:v", "8000k", "-b:a",
                "320k", "-crf", "18", "/out/a.x",
            ]
        );
        assert!(!a.iter().any(|s| s == "-hwaccel"));
    }

    #[test]
    fn mp4_low_quality_has_no_crf() {
        let cfg = software("aac", Some("libx264"));
        let a = args(OutputFormat::Mp4, Quality::Low, &cfg);
        assert!(!a.iter().any(|s| s == "-crf"));
        assert!(a.windows(2).any(|w| w == ["-b:v", "1000k"]));
    }

    #[test]
    fn gpu_flags_precede_input() {
        let cfg = ExecutionConfig {
            enable_gpu: true,
            encoder: EncoderFamily::Nvenc,
            video_codec: Some("h264_nvenc".into()),
            ..software("aac", None)
        };
        let a = args(OutputFormat::Mp4, Quality::Medium, &cfg);
        assert_eq!(
            a[..9],
            [
                "-y", "-progress", "pipe:2", "-hwaccel", "cuda", "-hwaccel_output_format",
                "cuda", "-i", "/in/a.mkv",
            ]
        );
        assert!(a.windows(2).any(|w| w == ["-c:v", "h264_nvenc"]));
        assert!(!a.iter().any(|s| s == "-preset"));
    }

    #[test]
    fn gpu_flags_require_enable_gpu() {
        let cfg = ExecutionConfig {
            enable_gpu: false,
            encoder: EncoderFamily::Qsv,
            video_codec: Some("h264_qsv".into()),
            ..software("aac", None)
        };
        let a = args(OutputFormat::Mp4, Quality::Medium, &cfg);
        assert!(!a.iter().any(|s| s == "-hwaccel"));
        assert!(a.windows(2).any(|w| w == ["-c:v", "libx264"]));
    }

    #[test]
    fn wav_and_aac_args() {
        let cfg = software("pcm_s16le", None);
        let wav = args(OutputFormat::Wav, Quality::Low, &cfg);
        assert_eq!(
            wav[7..],
            ["-vn", "-acodec", "pcm_s16le", "-ar", "44100", "-ac", "2", "/out/a.x"]
        );

        let aac = args(OutputFormat::Aac, Quality::Medium, &software("aac", None));
        assert_eq!(aac[7..], ["-vn", "-acodec", "aac", "-ab", "192k", "/out/a.x"]);
    }

    #[test]
    fn output_path_is_last() {
        for format in OutputFormat::ALL {
            let a = args(format, Quality::Medium, &ExecutionConfig::default());
            assert_eq!(a.last().map(String::as_str), Some("/out/a.x"));
        }
    }

    #[test]
    fn hwaccel_table() {
        assert_eq!(hwaccel_args(EncoderFamily::Amf), ["-hwaccel", "d3d11va"]);
        assert_eq!(hwaccel_args(EncoderFamily::Qsv), ["-hwaccel", "qsv"]);
        assert!(hwaccel_args(EncoderFamily::Software).is_empty());
    }
}
