//! Unified error type for mediaforge.
//!
//! Every crate funnels its failures into [`Error`]. Job-level errors are
//! turned into a terminal job status via [`Error::terminal_status`]; the
//! rest are absorbed locally or reported by the caller.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::media::JobStatus;

/// Coarse category of a failed conversion, derived from the transcoder's
/// diagnostic output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputMissing,
    CorruptInput,
    PermissionDenied,
    DiskFull,
    UnsupportedCodec,
    /// Nothing recognisable; the message carries the last diagnostic line.
    Unclassified,
}

impl FailureKind {
    /// Human-readable message for a classified failure.
    ///
    /// Returns `None` for [`FailureKind::Unclassified`], whose message comes
    /// from the diagnostic stream instead.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Self::InputMissing => Some("Input file not found"),
            Self::CorruptInput => Some("Invalid or corrupted input file"),
            Self::PermissionDenied => Some("Permission denied - check file permissions"),
            Self::DiskFull => Some("Not enough disk space"),
            Self::UnsupportedCodec => Some("Unsupported codec in input file"),
            Self::Unclassified => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputMissing => write!(f, "input_missing"),
            Self::CorruptInput => write!(f, "corrupt_input"),
            Self::PermissionDenied => write!(f, "permission_denied"),
            Self::DiskFull => write!(f, "disk_full"),
            Self::UnsupportedCodec => write!(f, "unsupported_codec"),
            Self::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// Unified error type covering all failure modes in mediaforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Hardware probing failed. Always recovered with a fallback snapshot.
    #[error("Hardware detection error: {0}")]
    Detection(String),

    /// Media inspection failed for a single file.
    #[error("Probe error: {0}")]
    Probe(String),

    /// The transcoder exited unsuccessfully. Displays only the classified
    /// message so it can be shown to users as-is.
    #[error("{message}")]
    Conversion {
        /// Coarse failure category.
        kind: FailureKind,
        /// Human-readable error description.
        message: String,
    },

    /// The transcoder was terminated by a cancel request.
    #[error("Conversion cancelled")]
    Cancelled,

    /// A job descriptor or configuration value was rejected.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An external tool (ffmpeg, ffprobe, lspci, etc.) could not be run.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The terminal status a job reaches when its run ends with this error.
    pub fn terminal_status(&self) -> JobStatus {
        match self {
            Error::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }

    /// Convenience constructor for [`Error::Conversion`].
    ///
    /// Classified kinds always use their canonical message; `detail` is only
    /// used for [`FailureKind::Unclassified`].
    pub fn conversion(kind: FailureKind, detail: impl Into<String>) -> Self {
        let message = match kind.message() {
            Some(msg) => msg.to_string(),
            None => detail.into(),
        };
        Error::Conversion { kind, message }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Configuration`].
    pub fn configuration(message: impl fmt::Display) -> Self {
        Error::Configuration(message.to_string())
    }

    /// Whether this error represents a user-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
