//! mf-av: ffmpeg/ffprobe process driving.
//!
//! Provides tool discovery, a timeout-aware command builder, ffprobe-backed
//! media inspection, the deterministic ffmpeg argument builder, the
//! diagnostic-stream progress parser, failure classification, and the
//! [`ProcessDriver`] that owns running conversions.

pub mod args;
pub mod classify;
pub mod command;
pub mod driver;
pub mod probe;
pub mod progress;
pub mod tools;

pub use command::{ToolCommand, ToolOutput};
pub use driver::{ConversionRequest, ProcessDriver, ProgressFn, Transcoder};
pub use progress::{ProgressParser, ProgressSample};
pub use tools::ToolRegistry;
