//! Job descriptors, job records, and submission validation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mf_core::{Error, Eta, JobId, JobStatus, MediaDescriptor, OutputFormat, Quality, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// JobSpec
// ---------------------------------------------------------------------------

/// What a caller submits: one input to convert.
///
/// `format` and `quality` stay strings until submission so that malformed
/// descriptors are rejected at the scheduler boundary rather than trusted
/// downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,
    pub input: PathBuf,
    /// Explicit output path. Derived from the input when absent.
    #[serde(default)]
    pub output: Option<PathBuf>,
    pub format: String,
    pub quality: String,
    /// Already-probed source description, if the caller has one.
    #[serde(default)]
    pub media: Option<MediaDescriptor>,
}

impl JobSpec {
    pub fn new(
        input: impl Into<PathBuf>,
        format: impl Into<String>,
        quality: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            input: input.into(),
            output: None,
            format: format.into(),
            quality: quality.into(),
            media: None,
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_media(mut self, media: MediaDescriptor) -> Self {
        self.media = Some(media);
        self
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// The scheduler's record of a submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub quality: Quality,
    pub status: JobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    pub speed: Option<f64>,
    pub eta: Option<Eta>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub media: Option<MediaDescriptor>,
}

impl Job {
    /// Validate a spec into a fresh `Pending` job.
    ///
    /// Rejects unknown formats or qualities, an empty input path, and an
    /// output that would overwrite the input.
    pub fn from_spec(spec: JobSpec, output_dir: Option<&Path>) -> Result<Self> {
        let format: OutputFormat = spec.format.parse()?;
        let quality: Quality = spec.quality.parse()?;

        if spec.input.as_os_str().is_empty() {
            return Err(Error::configuration("input path is empty"));
        }

        let output = match spec.output {
            Some(path) => path,
            None => derive_output_path(&spec.input, format, output_dir),
        };
        if output == spec.input {
            return Err(Error::configuration(format_args!(
                "output path {} is the same as the input",
                output.display()
            )));
        }

        Ok(Self {
            id: spec.id,
            input: spec.input,
            output,
            format,
            quality,
            status: JobStatus::Pending,
            progress: 0.0,
            speed: None,
            eta: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            media: spec.media,
        })
    }

    /// Source size in bytes: the probed size if known, else the file's
    /// current size on disk, else 0.
    pub async fn source_size(&self) -> u64 {
        match &self.media {
            Some(media) if media.size > 0 => media.size,
            _ => tokio::fs::metadata(&self.input)
                .await
                .map(|m| m.len())
                .unwrap_or(0),
        }
    }
}

/// `<output_dir or input dir>/<input stem>.<format extension>`.
pub fn derive_output_path(input: &Path, format: OutputFormat, output_dir: Option<&Path>) -> PathBuf {
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    dir.join(format!("{stem}.{}", format.extension()))
}

// ---------------------------------------------------------------------------
// Submission results
// ---------------------------------------------------------------------------

/// A job descriptor the scheduler refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub id: JobId,
    pub input: PathBuf,
    pub reason: String,
}

/// Result of a [`submit`](crate::SchedulerHandle::submit) call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    /// Ids that entered the queue, in submission order.
    pub accepted: Vec<JobId>,
    pub rejected: Vec<Rejection>,
}

/// What [`remove`](crate::SchedulerHandle::remove) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    /// Taken out of the pending queue.
    Dequeued,
    /// Its process was signalled and the job left the running set.
    Cancelled,
    /// The job had already finished; its record was dropped.
    Forgotten,
    /// No job with that id is known.
    NotFound,
}
