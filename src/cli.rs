use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediaforge")]
#[command(author, version, about = "Hardware-aware batch media converter")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert one or more files
    Convert {
        /// Input files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Target format (mp3, mp4, wav, aac)
        #[arg(short, long, default_value = "mp3")]
        format: String,

        /// Quality tier (low, medium, high, ultra)
        #[arg(short, long, default_value = "high")]
        quality: String,

        /// Directory for outputs (defaults to next to each input)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Maximum simultaneous conversions; disables hardware auto-detection
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Never use hardware-accelerated encoders
        #[arg(long)]
        no_gpu: bool,
    },

    /// Probe a media file and display information
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the detected hardware and recommended concurrency
    Hardware {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the encoder settings and estimate for converting a file
    Plan {
        /// File to plan for
        #[arg(required = true)]
        file: PathBuf,

        /// Target format
        #[arg(short, long, default_value = "mp3")]
        format: String,

        /// Quality tier
        #[arg(short, long, default_value = "high")]
        quality: String,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
