//! Supervision of ffmpeg conversion processes.
//!
//! [`ProcessDriver`] spawns one ffmpeg process per job, streams its
//! diagnostic output through a [`ProgressParser`], and keeps a registry of
//! running processes keyed by [`JobId`] so they can be cancelled from
//! elsewhere. Each run holds a guard that deregisters the job on every exit
//! path, and the child is killed if its handle is dropped.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mf_core::{Error, ExecutionConfig, JobId, MediaDescriptor, OutputFormat, Quality, Result};
use parking_lot::Mutex;
use tokio::process::Child;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::args::build_args;
use crate::classify::classify_failure;
use crate::command::ToolCommand;
use crate::probe::probe_file;
use crate::progress::{ProgressParser, ProgressSample};
use crate::tools::{ToolRegistry, FFMPEG, FFPROBE};

/// How long a terminated process may take to exit before it is killed.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Timeout for `ffmpeg -version` in [`ProcessDriver::verify`].
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of diagnostic lines retained for failure classification.
const DIAGNOSTIC_TAIL: usize = 64;

/// Callback receiving progress samples for one run.
pub type ProgressFn = Box<dyn Fn(ProgressSample) + Send + Sync>;

/// Everything needed to convert one input into one output.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub job_id: JobId,
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub quality: Quality,
    pub config: ExecutionConfig,
    /// Cancelling this token terminates the run, even one that has not
    /// spawned its process yet.
    pub cancel_token: CancellationToken,
}

/// A backend able to run and cancel conversions.
///
/// The scheduler only talks to this trait, which lets tests substitute a
/// scripted transcoder for real ffmpeg processes.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Run a conversion to completion.
    ///
    /// Returns [`Error::Cancelled`] when the run was terminated through
    /// [`Transcoder::cancel`] or [`Transcoder::cancel_all`], and
    /// [`Error::Conversion`] when the process failed on its own.
    async fn run(&self, request: ConversionRequest, on_progress: ProgressFn) -> Result<()>;

    /// Signal the process for `job_id` to terminate. Returns `false` if no
    /// process was registered for it.
    fn cancel(&self, job_id: JobId) -> bool;

    /// Signal every registered process. Returns how many were signalled.
    fn cancel_all(&self) -> usize;
}

#[derive(Debug)]
struct Registration {
    serial: u64,
    pid: Option<u32>,
    token: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<JobId, Registration>>>;

/// Removes a job's registration when its run ends.
struct RegistrationGuard {
    registry: Registry,
    job_id: JobId,
    serial: u64,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        if registry
            .get(&self.job_id)
            .is_some_and(|r| r.serial == self.serial)
        {
            registry.remove(&self.job_id);
        }
    }
}

/// ffmpeg-backed [`Transcoder`].
#[derive(Debug, Clone)]
pub struct ProcessDriver {
    tools: ToolRegistry,
    registry: Registry,
    next_serial: Arc<AtomicU64>,
}

impl ProcessDriver {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            tools,
            registry: Arc::default(),
            next_serial: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Check that ffmpeg can be executed. Returns its version line.
    pub async fn verify(&self) -> Result<String> {
        let ffmpeg = self.tools.require(FFMPEG)?;
        let output = ToolCommand::new(ffmpeg.to_path_buf())
            .arg("-version")
            .timeout(VERIFY_TIMEOUT)
            .execute()
            .await?;
        let version = output.stdout.lines().next().unwrap_or_default().to_string();
        tracing::info!("Using {version}");
        Ok(version)
    }

    /// Inspect a media file with ffprobe.
    pub async fn probe(&self, path: &Path) -> Result<MediaDescriptor> {
        let ffprobe = self.tools.require(FFPROBE)?;
        probe_file(ffprobe, path).await
    }

    /// Jobs that currently have a registered process.
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.registry.lock().keys().copied().collect()
    }

    fn register(&self, job_id: JobId, pid: Option<u32>, token: CancellationToken) -> RegistrationGuard {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        self.registry.lock().insert(
            job_id,
            Registration {
                serial,
                pid,
                token,
            },
        );
        RegistrationGuard {
            registry: Arc::clone(&self.registry),
            job_id,
            serial,
        }
    }
}

#[async_trait]
impl Transcoder for ProcessDriver {
    async fn run(&self, request: ConversionRequest, on_progress: ProgressFn) -> Result<()> {
        let job_id = request.job_id;
        if request.cancel_token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let ffmpeg = self.tools.require(FFMPEG)?.to_path_buf();
        let args = build_args(
            &request.input,
            &request.output,
            request.format,
            request.quality,
            &request.config,
        );
        let mut cmd = ToolCommand::new(ffmpeg);
        cmd.args(args);
        tracing::debug!(job_id = %job_id, args = ?cmd.get_args(), "Spawning ffmpeg");
        let mut child = cmd.spawn_streaming()?;

        let token = request.cancel_token;
        let _guard = self.register(job_id, child.id(), token.clone());

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("ffmpeg stderr was not captured".into()))?;
        let mut lines = FramedRead::new(stderr, AnyDelimiterCodec::new(b"\r\n".to_vec(), Vec::new()));

        let mut parser = ProgressParser::new();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_TAIL);
        let mut last_progress = 0.0_f64;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return terminate(job_id, child).await;
                }
                chunk = lines.next() => match chunk {
                    Some(Ok(bytes)) => {
                        let line = String::from_utf8_lossy(&bytes);
                        let line = line.trim_end();
                        if line.is_empty() {
                            continue;
                        }
                        match parser.feed(line) {
                            Some(sample) => {
                                if sample.progress >= last_progress {
                                    last_progress = sample.progress;
                                    on_progress(sample);
                                }
                            }
                            None if !is_progress_field(line) => {
                                if tail.len() == DIAGNOSTIC_TAIL {
                                    tail.pop_front();
                                }
                                tail.push_back(line.to_string());
                            }
                            None => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(job_id = %job_id, "Error reading ffmpeg output: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return terminate(job_id, child).await;
            }
            status = child.wait() => status?,
        };

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match status.code() {
            Some(0) => {
                tracing::info!(job_id = %job_id, "ffmpeg finished");
                Ok(())
            }
            Some(code) => {
                let diagnostics = tail.make_contiguous().join("\n");
                let err = classify_failure(&diagnostics);
                tracing::error!(job_id = %job_id, code, "ffmpeg failed: {err}");
                Err(err)
            }
            None => {
                tracing::warn!(job_id = %job_id, "ffmpeg terminated by signal");
                Err(Error::Cancelled)
            }
        }
    }

    fn cancel(&self, job_id: JobId) -> bool {
        let Some(registration) = self.registry.lock().remove(&job_id) else {
            return false;
        };
        tracing::info!(job_id = %job_id, "Cancelling conversion");
        registration.token.cancel();
        if let Some(pid) = registration.pid {
            send_terminate(pid);
        }
        true
    }

    fn cancel_all(&self) -> usize {
        let drained: Vec<(JobId, Registration)> = self.registry.lock().drain().collect();
        for (job_id, registration) in &drained {
            tracing::info!(job_id = %job_id, "Cancelling conversion");
            registration.token.cancel();
            if let Some(pid) = registration.pid {
                send_terminate(pid);
            }
        }
        drained.len()
    }
}

/// Ask the process to exit, killing it after the grace period.
async fn terminate(job_id: JobId, mut child: Child) -> Result<()> {
    if let Some(pid) = child.id() {
        send_terminate(pid);
    }
    match tokio::time::timeout(TERMINATION_GRACE, child.wait()).await {
        Ok(_) => tracing::debug!(job_id = %job_id, "ffmpeg exited after termination"),
        Err(_) => {
            tracing::warn!(
                job_id = %job_id,
                "ffmpeg did not exit within {:?}; killing",
                TERMINATION_GRACE
            );
            if let Err(e) = child.kill().await {
                tracing::warn!(job_id = %job_id, "Failed to kill ffmpeg: {e}");
            }
        }
    }
    Err(Error::Cancelled)
}

/// `key=value` lines emitted by `-progress`, and stats lines, which never
/// explain a failure.
fn is_progress_field(line: &str) -> bool {
    if line.starts_with("frame=") || line.starts_with("size=") {
        return true;
    }
    match line.split_once('=') {
        Some((key, value)) => {
            !key.is_empty()
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !value.contains(' ')
        }
        None => false,
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        // The process may already have exited.
        tracing::debug!(pid, "SIGTERM failed: {e}");
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) {
    // The cancelled token makes the run loop kill the child directly.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_fields_are_recognised() {
        assert!(is_progress_field("out_time=00:00:01.000000"));
        assert!(is_progress_field("progress=continue"));
        assert!(is_progress_field("frame=  100 fps= 25 q=28.0 size=  256kB"));
        assert!(!is_progress_field("Conversion failed!"));
        assert!(!is_progress_field("[mp3 @ 0x55] Estimating duration from bitrate, this may be inaccurate"));
    }

    #[test]
    fn cancel_unknown_job_is_noop() {
        let driver = ProcessDriver::new(ToolRegistry::default());
        assert!(!driver.cancel(JobId::new()));
        assert_eq!(driver.cancel_all(), 0);
        assert!(driver.active_jobs().is_empty());
    }

    #[test]
    fn guard_only_removes_its_own_registration() {
        let driver = ProcessDriver::new(ToolRegistry::default());
        let id = JobId::new();
        let first = driver.register(id, None, CancellationToken::new());
        let _second = driver.register(id, None, CancellationToken::new());
        drop(first);
        assert_eq!(driver.active_jobs(), vec![id]);
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_tool_error() {
        let driver = ProcessDriver::new(ToolRegistry::default());
        let request = ConversionRequest {
            job_id: JobId::new(),
            input: "in.wav".into(),
            output: "out.mp3".into(),
            format: OutputFormat::Mp3,
            quality: Quality::Medium,
            config: ExecutionConfig::default(),
            cancel_token: CancellationToken::new(),
        };
        let err = driver.run(request, Box::new(|_| {})).await.unwrap_err();
        assert!(matches!(err, Error::Tool { .. }), "unexpected: {err:?}");
    }

    #[cfg(unix)]
    mod process {
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Mutex as StdMutex;

        use super::*;

        fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn driver_with(ffmpeg: PathBuf) -> ProcessDriver {
            ProcessDriver::new(ToolRegistry::default().with_tool(FFMPEG, ffmpeg))
        }

        fn request(dir: &Path) -> ConversionRequest {
            ConversionRequest {
                job_id: JobId::new(),
                input: dir.join("in.wav"),
                output: dir.join("out.mp3"),
                format: OutputFormat::Mp3,
                quality: Quality::High,
                config: ExecutionConfig::default(),
                cancel_token: CancellationToken::new(),
            }
        }

        fn recorder() -> (Arc<StdMutex<Vec<ProgressSample>>>, ProgressFn) {
            let samples = Arc::new(StdMutex::new(Vec::new()));
            let sink = Arc::clone(&samples);
            let f: ProgressFn = Box::new(move |s| sink.lock().unwrap().push(s));
            (samples, f)
        }

        #[tokio::test]
        async fn successful_run_reports_progress() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(
                dir.path(),
                r#"echo "ffmpeg version 6.1" >&2
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1411 kb/s" >&2
echo "out_time=00:00:05.000000" >&2
echo "speed=2.0x" >&2
printf 'size=     128kB time=00:00:10.00 bitrate= 104.9kbits/s speed=2.5x\r' >&2
exit 0"#,
            );
            let driver = driver_with(ffmpeg);
            let (samples, on_progress) = recorder();

            driver.run(request(dir.path()), on_progress).await.unwrap();

            let samples = samples.lock().unwrap();
            let progress: Vec<f64> = samples.iter().map(|s| s.progress).collect();
            assert_eq!(progress, vec![50.0, 100.0]);
            assert_eq!(samples[0].speed, Some(2.0));
            assert_eq!(samples[1].speed, Some(2.5));
            assert!(driver.active_jobs().is_empty());
        }

        #[tokio::test]
        async fn no_duration_means_no_progress() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(
                dir.path(),
                r#"echo "size=1kB time=00:00:01.00 bitrate=1k speed=1.0x" >&2"#,
            );
            let (samples, on_progress) = recorder();
            driver_with(ffmpeg)
                .run(request(dir.path()), on_progress)
                .await
                .unwrap();
            assert!(samples.lock().unwrap().is_empty());
        }

        #[tokio::test]
        async fn missing_input_is_classified() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(
                dir.path(),
                r#"echo "ffmpeg version 6.1" >&2
echo "/media/missing.wav: No such file or directory" >&2
exit 1"#,
            );
            let err = driver_with(ffmpeg)
                .run(request(dir.path()), Box::new(|_| {}))
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "Input file not found");
            assert_eq!(err.terminal_status(), mf_core::JobStatus::Failed);
        }

        #[tokio::test]
        async fn unclassified_failure_uses_last_line() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(
                dir.path(),
                r#"echo "ffmpeg version 6.1" >&2
echo "Error while opening encoder for output stream #0:0" >&2
echo "progress=end" >&2
exit 1"#,
            );
            let err = driver_with(ffmpeg)
                .run(request(dir.path()), Box::new(|_| {}))
                .await
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                "Error while opening encoder for output stream #0:0"
            );
        }

        #[tokio::test]
        async fn cancel_terminates_the_process() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(dir.path(), "exec sleep 30");
            let driver = driver_with(ffmpeg);
            let req = request(dir.path());
            let id = req.job_id;

            let runner = driver.clone();
            let handle =
                tokio::spawn(async move { runner.run(req, Box::new(|_| {})).await });

            for _ in 0..500 {
                if driver.active_jobs().contains(&id) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert!(driver.cancel(id));
            assert!(!driver.cancel(id), "second cancel must be a no-op");

            let result = tokio::time::timeout(Duration::from_secs(10), handle)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Err(Error::Cancelled)));
            assert!(driver.active_jobs().is_empty());
        }

        #[tokio::test]
        async fn cancel_all_clears_registry() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(dir.path(), "exec sleep 30");
            let driver = driver_with(ffmpeg);

            let mut handles = Vec::new();
            let mut ids = Vec::new();
            for _ in 0..2 {
                let req = request(dir.path());
                ids.push(req.job_id);
                let runner = driver.clone();
                handles.push(tokio::spawn(async move {
                    runner.run(req, Box::new(|_| {})).await
                }));
            }
            for _ in 0..500 {
                if driver.active_jobs().len() == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            assert_eq!(driver.cancel_all(), 2);
            assert!(driver.active_jobs().is_empty());
            for handle in handles {
                let result = tokio::time::timeout(Duration::from_secs(10), handle)
                    .await
                    .unwrap()
                    .unwrap();
                assert!(matches!(result, Err(Error::Cancelled)));
            }
            assert!(!driver.cancel(ids[0]));
        }

        #[tokio::test]
        async fn cancelled_token_prevents_spawn() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("spawned");
            let ffmpeg = fake_ffmpeg(dir.path(), &format!("touch {}", marker.display()));
            let req = request(dir.path());
            req.cancel_token.cancel();

            let err = driver_with(ffmpeg)
                .run(req, Box::new(|_| {}))
                .await
                .unwrap_err();
            assert!(err.is_cancelled());
            assert!(!marker.exists());
        }

        #[tokio::test]
        async fn token_cancellation_terminates_the_process() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(dir.path(), "exec sleep 30");
            let driver = driver_with(ffmpeg);
            let req = request(dir.path());
            let (id, token) = (req.job_id, req.cancel_token.clone());

            let runner = driver.clone();
            let handle =
                tokio::spawn(async move { runner.run(req, Box::new(|_| {})).await });
            for _ in 0..500 {
                if driver.active_jobs().contains(&id) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            token.cancel();

            let result = tokio::time::timeout(Duration::from_secs(10), handle)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Err(Error::Cancelled)));
            assert!(driver.active_jobs().is_empty());
        }

        #[tokio::test]
        async fn verify_reports_version() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(dir.path(), r#"echo "ffmpeg version 6.1-test""#);
            let version = driver_with(ffmpeg).verify().await.unwrap();
            assert_eq!(version, "ffmpeg version 6.1-test");
        }
    }
}
