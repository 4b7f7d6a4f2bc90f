//! The scheduler actor.
//!
//! One task owns the pending queue, the running set, and every job record.
//! Public operations arrive as [`SchedulerCommand`]s through a
//! [`SchedulerHandle`]; conversion tasks report back over an internal
//! channel. Because all mutation happens on this one task, the concurrency
//! limit holds without any locking.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use mf_av::{ConversionRequest, ProgressFn, ProgressSample, Transcoder};
use mf_core::config::{clamp_concurrency, SchedulerConfig};
use mf_core::{Error, Eta, EventBus, JobId, JobStatus, JobUpdate, Result};
use mf_hw::HardwareProfiler;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::command::{JobMessage, SchedulerCommand};
use crate::handle::SchedulerHandle;
use crate::job::{Job, JobSpec, Rejection, Removal, SubmitOutcome};
use crate::status::{QueueStatus, SchedulerState};

/// Capacity of the command channel between handles and the actor.
const COMMAND_BUFFER: usize = 64;

/// Scheduler settings, usually taken from [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Limit used when `auto_detect_hardware` is off.
    pub max_concurrent_jobs: usize,
    pub gpu_acceleration: bool,
    /// Take the limit from the hardware profiler instead.
    pub auto_detect_hardware: bool,
    pub output_dir: Option<PathBuf>,
    /// Admission re-check period while work remains.
    pub tick_interval: Duration,
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs,
            gpu_acceleration: config.gpu_acceleration,
            auto_detect_hardware: config.auto_detect_hardware,
            output_dir: config.output_dir.clone(),
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

/// A job holding a running slot.
struct RunningJob {
    /// Admission serial, echoed back in [`JobMessage`]s.
    run: u64,
    started: Instant,
    cancel_token: CancellationToken,
}

impl RunningJob {
    /// Stop the job's conversion, whether or not its process has spawned.
    fn cancel(&self, job_id: JobId, transcoder: &dyn Transcoder) {
        self.cancel_token.cancel();
        transcoder.cancel(job_id);
    }
}

/// Bounded-concurrency job scheduler. See the module docs.
pub struct Scheduler {
    options: SchedulerOptions,
    profiler: Arc<HardwareProfiler>,
    transcoder: Arc<dyn Transcoder>,
    events: Arc<EventBus>,

    jobs: HashMap<JobId, Job>,
    /// Submission order of the records in `jobs`.
    order: Vec<JobId>,
    queue: VecDeque<JobId>,
    running: HashMap<JobId, RunningJob>,
    paused: bool,
    max_concurrent: usize,
    next_run: u64,

    job_tx: mpsc::UnboundedSender<JobMessage>,
}

impl Scheduler {
    /// Start the actor on the current tokio runtime and return a handle to it.
    pub fn spawn(
        options: SchedulerOptions,
        profiler: Arc<HardwareProfiler>,
        transcoder: Arc<dyn Transcoder>,
        events: Arc<EventBus>,
    ) -> SchedulerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (job_tx, job_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            max_concurrent: clamp_concurrency(options.max_concurrent_jobs),
            options,
            profiler,
            transcoder,
            events: Arc::clone(&events),
            jobs: HashMap::new(),
            order: Vec::new(),
            queue: VecDeque::new(),
            running: HashMap::new(),
            paused: false,
            next_run: 0,
            job_tx,
        };
        tokio::spawn(scheduler.run(cmd_rx, job_rx));

        SchedulerHandle::new(cmd_tx, events)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SchedulerCommand>,
        mut job_rx: mpsc::UnboundedReceiver<JobMessage>,
    ) {
        tracing::info!("Scheduler started");

        // Detect hardware before serving commands so that later admissions
        // read the cached snapshot instead of waiting on lspci.
        let snapshot = self.profiler.snapshot().await;
        if self.options.auto_detect_hardware {
            self.max_concurrent = self.concurrency_limit().await;
        }
        tracing::debug!(
            cores = snapshot.cpu.cores,
            max_concurrent_jobs = self.max_concurrent,
            "Hardware profile ready"
        );

        let mut tick = tokio::time::interval(self.options.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        tracing::debug!("All scheduler handles dropped");
                        break;
                    };
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }
                Some(msg) = job_rx.recv() => self.handle_job_message(msg),
                _ = tick.tick(), if self.has_work() => {}
            }
            self.admit();
        }

        self.cancel_all();
        tracing::info!("Scheduler stopped");
    }

    /// Returns `false` when the actor should stop.
    async fn handle_command(&mut self, cmd: SchedulerCommand) -> bool {
        match cmd {
            SchedulerCommand::Submit { jobs, reply } => {
                let outcome = self.submit(jobs).await;
                let _ = reply.send(outcome);
            }
            SchedulerCommand::Remove { job_id, reply } => {
                let _ = reply.send(self.remove(job_id));
            }
            SchedulerCommand::PauseAll { reply } => {
                self.pause_all();
                let _ = reply.send(());
            }
            SchedulerCommand::ResumeAll { reply } => {
                self.resume_all();
                self.admit();
                let _ = reply.send(());
            }
            SchedulerCommand::CancelAll { reply } => {
                let _ = reply.send(self.cancel_all());
            }
            SchedulerCommand::SetMaxConcurrent { max, reply } => {
                self.options.auto_detect_hardware = false;
                self.options.max_concurrent_jobs = max;
                self.max_concurrent = clamp_concurrency(max);
                tracing::info!(max_concurrent_jobs = self.max_concurrent, "Concurrency limit set");
                self.admit();
                let _ = reply.send(self.max_concurrent);
            }
            SchedulerCommand::ClearFinished { reply } => {
                let _ = reply.send(self.clear_finished());
            }
            SchedulerCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            SchedulerCommand::Jobs { reply } => {
                let jobs = self
                    .order
                    .iter()
                    .filter_map(|id| self.jobs.get(id).cloned())
                    .collect();
                let _ = reply.send(jobs);
            }
            SchedulerCommand::Job { job_id, reply } => {
                let _ = reply.send(self.jobs.get(&job_id).cloned());
            }
            SchedulerCommand::Shutdown { reply } => {
                tracing::info!("Scheduler shutting down");
                self.cancel_all();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    async fn submit(&mut self, specs: Vec<JobSpec>) -> SubmitOutcome {
        let mut outcome = SubmitOutcome::default();

        for spec in specs {
            let id = spec.id;
            let input = spec.input.clone();

            let validated = if self.jobs.contains_key(&id) {
                Err(Error::configuration(format_args!("duplicate job id {id}")))
            } else {
                Job::from_spec(spec, self.options.output_dir.as_deref())
            };

            match validated {
                Ok(mut job) => {
                    job.status = JobStatus::Queued;
                    self.publish(&job);
                    self.order.push(id);
                    self.queue.push_back(id);
                    self.jobs.insert(id, job);
                    outcome.accepted.push(id);
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, input = %input.display(), "Rejected job: {e}");
                    outcome.rejected.push(Rejection {
                        id,
                        input,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.max_concurrent = self.concurrency_limit().await;
        if self.paused {
            self.resume_all();
        }

        tracing::info!(
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            max_concurrent_jobs = self.max_concurrent,
            "Jobs submitted"
        );

        self.admit();
        outcome
    }

    fn remove(&mut self, job_id: JobId) -> Removal {
        if let Some(pos) = self.queue.iter().position(|id| *id == job_id) {
            self.queue.remove(pos);
            self.drop_cancelled(job_id);
            tracing::info!(job_id = %job_id, "Removed queued job");
            Removal::Dequeued
        } else if let Some(running) = self.running.remove(&job_id) {
            running.cancel(job_id, self.transcoder.as_ref());
            self.drop_cancelled(job_id);
            tracing::info!(job_id = %job_id, "Cancelled running job");
            Removal::Cancelled
        } else if self.jobs.remove(&job_id).is_some() {
            self.order.retain(|id| *id != job_id);
            Removal::Forgotten
        } else {
            Removal::NotFound
        }
    }

    fn pause_all(&mut self) {
        self.paused = true;
        let ids: Vec<JobId> = self.running.keys().copied().collect();
        for id in ids {
            self.relabel(id, JobStatus::Paused);
        }
        tracing::info!(running = self.running.len(), "Scheduler paused");
    }

    fn resume_all(&mut self) {
        self.paused = false;
        let ids: Vec<JobId> = self.running.keys().copied().collect();
        for id in ids {
            self.relabel(id, JobStatus::Running);
        }
        tracing::info!(queued = self.queue.len(), "Scheduler resumed");
    }

    fn cancel_all(&mut self) -> usize {
        for running in self.running.values() {
            running.cancel_token.cancel();
        }
        let signalled = self.transcoder.cancel_all();
        let affected: Vec<JobId> = self
            .running
            .drain()
            .map(|(id, _)| id)
            .chain(self.queue.drain(..))
            .collect();

        let now = Utc::now();
        for id in &affected {
            if let Some(job) = self.jobs.get_mut(id) {
                job.status = JobStatus::Cancelled;
                job.error = Some(Error::Cancelled.to_string());
                job.speed = None;
                job.eta = None;
                job.finished_at = Some(now);
            }
            if let Some(job) = self.jobs.get(id) {
                self.publish(job);
            }
        }
        self.paused = false;

        if !affected.is_empty() {
            tracing::info!(cancelled = affected.len(), signalled, "Cancelled all jobs");
        }
        affected.len()
    }

    fn clear_finished(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.status.is_terminal());
        let jobs = &self.jobs;
        self.order.retain(|id| jobs.contains_key(id));
        before - self.jobs.len()
    }

    fn status(&self) -> QueueStatus {
        QueueStatus {
            total: self.jobs.len(),
            running: self.running.len(),
            queued: self.queue.len(),
            finished: self
                .jobs
                .values()
                .filter(|job| job.status.is_terminal())
                .count(),
            state: self.state(),
            paused: self.paused,
            max_concurrent_jobs: self.max_concurrent,
        }
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    fn admit(&mut self) {
        if self.paused {
            return;
        }
        while self.running.len() < self.max_concurrent {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            self.start(id);
        }
    }

    /// Claim a slot for `job_id` and spawn its conversion. The execution
    /// config is derived on the spawned task, which reads the source size
    /// from disk when the probe did not supply it.
    fn start(&mut self, job_id: JobId) {
        let run = self.next_run;
        self.next_run += 1;

        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.eta = Some(Eta::Calculating);

        tracing::info!(
            job_id = %job_id,
            input = %job.input.display(),
            output = %job.output.display(),
            "Starting conversion"
        );

        let cancel_token = CancellationToken::new();
        let spec = job.clone();
        self.running.insert(
            job_id,
            RunningJob {
                run,
                started: Instant::now(),
                cancel_token: cancel_token.clone(),
            },
        );
        if let Some(job) = self.jobs.get(&job_id) {
            self.publish(job);
        }

        let progress_tx = self.job_tx.clone();
        let on_progress: ProgressFn = Box::new(move |sample| {
            let _ = progress_tx.send(JobMessage::Progress {
                job_id,
                run,
                sample,
            });
        });
        let done_tx = self.job_tx.clone();
        let transcoder = Arc::clone(&self.transcoder);
        let profiler = Arc::clone(&self.profiler);
        let gpu_acceleration = self.options.gpu_acceleration;
        tokio::spawn(async move {
            let size = spec.source_size().await;
            let config = profiler.config_for(size, spec.format, gpu_acceleration).await;
            tracing::debug!(
                job_id = %job_id,
                size,
                preset = %config.preset,
                threads = config.threads,
                gpu = config.enable_gpu,
                "Execution config"
            );

            let request = ConversionRequest {
                job_id,
                input: spec.input,
                output: spec.output,
                format: spec.format,
                quality: spec.quality,
                config,
                cancel_token,
            };
            let result = transcoder.run(request, on_progress).await;
            let _ = done_tx.send(JobMessage::Finished {
                job_id,
                run,
                result,
            });
        });
    }

    async fn concurrency_limit(&self) -> usize {
        if self.options.auto_detect_hardware {
            clamp_concurrency(self.profiler.recommended_concurrency().await)
        } else {
            clamp_concurrency(self.options.max_concurrent_jobs)
        }
    }

    // -----------------------------------------------------------------------
    // Conversion task messages
    // -----------------------------------------------------------------------

    fn handle_job_message(&mut self, msg: JobMessage) {
        match msg {
            JobMessage::Progress {
                job_id,
                run,
                sample,
            } => self.on_progress(job_id, run, sample),
            JobMessage::Finished {
                job_id,
                run,
                result,
            } => self.on_finished(job_id, run, result),
        }
    }

    /// The running entry for `job_id`, if it belongs to admission `run`.
    fn current_run(&self, job_id: JobId, run: u64) -> Option<&RunningJob> {
        self.running.get(&job_id).filter(|r| r.run == run)
    }

    fn on_progress(&mut self, job_id: JobId, run: u64, sample: ProgressSample) {
        let Some(started) = self.current_run(job_id, run).map(|r| r.started) else {
            return;
        };
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if sample.progress < job.progress {
            tracing::debug!(job_id = %job_id, "Dropping out-of-order progress sample");
            return;
        }
        job.progress = sample.progress;
        job.speed = sample.speed;
        job.eta = Some(Eta::estimate(started.elapsed(), sample.progress));

        if let Some(job) = self.jobs.get(&job_id) {
            self.publish(job);
        }
    }

    fn on_finished(&mut self, job_id: JobId, run: u64, result: Result<()>) {
        // Jobs removed or cancelled through the scheduler have already
        // published their terminal status.
        if self.current_run(job_id, run).is_none() {
            tracing::debug!(job_id = %job_id, run, "Ignoring completion of a run that is no longer current");
            return;
        }
        self.running.remove(&job_id);
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };

        match result {
            Ok(()) => {
                job.status = JobStatus::Completed;
                job.progress = 100.0;
                tracing::info!(job_id = %job_id, output = %job.output.display(), "Conversion completed");
            }
            Err(e) => {
                job.status = e.terminal_status();
                job.error = Some(e.to_string());
                if e.is_cancelled() {
                    tracing::info!(job_id = %job_id, "Conversion cancelled");
                } else {
                    tracing::error!(job_id = %job_id, error = %e, "Conversion failed");
                }
            }
        }
        job.speed = None;
        job.eta = None;
        job.finished_at = Some(Utc::now());

        if let Some(job) = self.jobs.get(&job_id) {
            self.publish(job);
        }

        if self.queue.is_empty() && self.running.is_empty() {
            tracing::info!("All jobs finished");
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn state(&self) -> SchedulerState {
        if self.paused {
            SchedulerState::Paused
        } else if self.has_work() {
            SchedulerState::Processing
        } else {
            SchedulerState::Idle
        }
    }

    fn has_work(&self) -> bool {
        !self.queue.is_empty() || !self.running.is_empty()
    }

    /// Change a running job's label between `running` and `paused`.
    fn relabel(&mut self, job_id: JobId, status: JobStatus) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if job.status == status || !job.status.can_transition_to(status) {
            return;
        }
        job.status = status;
        if let Some(job) = self.jobs.get(&job_id) {
            self.publish(job);
        }
    }

    /// Publish `cancelled` for a job and drop its record.
    fn drop_cancelled(&mut self, job_id: JobId) {
        if let Some(mut job) = self.jobs.remove(&job_id) {
            job.status = JobStatus::Cancelled;
            job.error = Some(Error::Cancelled.to_string());
            job.speed = None;
            job.eta = None;
            self.publish(&job);
        }
        self.order.retain(|id| *id != job_id);
    }

    fn publish(&self, job: &Job) {
        self.events.publish(JobUpdate {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            speed: job.speed,
            eta: job.eta,
            error: job.error.clone(),
        });
    }
}
