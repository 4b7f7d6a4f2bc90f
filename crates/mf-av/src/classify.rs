//! Map ffmpeg's diagnostic output to a coarse failure category.

use mf_core::{Error, FailureKind};

/// Substrings checked in order; the first hit wins.
const PATTERNS: &[(&str, FailureKind)] = &[
    ("No such file or directory", FailureKind::InputMissing),
    ("Invalid data found", FailureKind::CorruptInput),
    ("Permission denied", FailureKind::PermissionDenied),
    ("Disk full", FailureKind::DiskFull),
    ("codec not currently supported", FailureKind::UnsupportedCodec),
];

/// Prefixes of ffmpeg's version banner, which never explain a failure.
const BANNER_PREFIXES: &[&str] = &["ffmpeg version", "  built", "  configuration", "  lib"];

const UNKNOWN_ERROR: &str = "Unknown conversion error";

/// Classify a failed run's diagnostic text into an [`Error::Conversion`].
///
/// Unrecognised failures carry the last non-banner, non-empty line.
pub fn classify_failure(diagnostics: &str) -> Error {
    if let Some((_, kind)) = PATTERNS.iter().find(|(p, _)| diagnostics.contains(p)) {
        return Error::conversion(*kind, "");
    }

    let last_line = diagnostics
        .lines()
        .filter(|line| !BANNER_PREFIXES.iter().any(|p| line.starts_with(p)))
        .filter(|line| !line.trim().is_empty())
        .next_back()
        .map(str::trim)
        .unwrap_or(UNKNOWN_ERROR);

    Error::conversion(FailureKind::Unclassified, last_line)
}
