//! Shared helpers for scheduler integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mf_av::classify::classify_failure;
use mf_av::{ConversionRequest, ProgressFn, ProgressSample, Transcoder};
use mf_core::{Error, Event, EventBus, JobId, JobUpdate, MediaDescriptor, Result};
use mf_hw::{CpuInfo, GpuSet, HardwareProfiler, HardwareSnapshot, MemoryInfo};
use mf_queue::{Job, JobSpec, QueueStatus, Scheduler, SchedulerHandle, SchedulerOptions};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

const GIB: u64 = 1024 * 1024 * 1024;

/// What a fake conversion should do next.
#[derive(Debug, Clone)]
pub enum Step {
    Progress(f64),
    Succeed,
    /// Exit unsuccessfully with the given diagnostic text.
    Fail(String),
}

#[derive(Default)]
struct FakeState {
    controls: HashMap<JobId, mpsc::UnboundedSender<Step>>,
    current: usize,
    max_seen: usize,
    started: Vec<JobId>,
    cancelled: Vec<JobId>,
}

/// Transcoder whose runs block until the test tells them what to do.
#[derive(Default)]
pub struct FakeTranscoder {
    state: Mutex<FakeState>,
    /// How long a cancelled run takes to wind down, like ffmpeg after SIGTERM.
    cancel_delay: Duration,
}

impl FakeTranscoder {
    pub fn with_cancel_delay(cancel_delay: Duration) -> Self {
        Self {
            cancel_delay,
            ..Self::default()
        }
    }

    /// Drive the run for `job_id`. Returns `false` if it is not running.
    pub fn send(&self, job_id: JobId, step: Step) -> bool {
        self.state
            .lock()
            .controls
            .get(&job_id)
            .is_some_and(|tx| tx.send(step).is_ok())
    }

    /// Runs currently in progress.
    pub fn current(&self) -> usize {
        self.state.lock().current
    }

    /// Highest number of simultaneous runs observed.
    pub fn max_seen(&self) -> usize {
        self.state.lock().max_seen
    }

    /// Job ids in the order their runs started.
    pub fn started(&self) -> Vec<JobId> {
        self.state.lock().started.clone()
    }

    /// Job ids passed to `cancel`/`cancel_all` while registered.
    pub fn cancelled(&self) -> Vec<JobId> {
        self.state.lock().cancelled.clone()
    }

    /// Wait until at least `n` runs have started.
    pub async fn wait_started(&self, n: usize) {
        for _ in 0..500 {
            if self.state.lock().started.len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fewer than {n} runs started within 5s");
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn run(&self, request: ConversionRequest, on_progress: ProgressFn) -> Result<()> {
        let job_id = request.job_id;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let own = tx.downgrade();
        {
            let mut state = self.state.lock();
            state.controls.insert(job_id, tx);
            state.current += 1;
            state.max_seen = state.max_seen.max(state.current);
            state.started.push(job_id);
        }

        let result = loop {
            tokio::select! {
                biased;
                _ = request.cancel_token.cancelled() => {
                    tokio::time::sleep(self.cancel_delay).await;
                    break Err(Error::Cancelled);
                }
                step = rx.recv() => match step {
                    Some(Step::Progress(progress)) => on_progress(ProgressSample {
                        progress,
                        speed: Some(1.5),
                        current_secs: progress,
                    }),
                    Some(Step::Succeed) => break Ok(()),
                    Some(Step::Fail(diagnostics)) => break Err(classify_failure(&diagnostics)),
                    None => {
                        tokio::time::sleep(self.cancel_delay).await;
                        break Err(Error::Cancelled);
                    }
                },
            }
        };

        let mut state = self.state.lock();
        state.current -= 1;
        // A later run may have registered under the same id.
        if let Some(own) = own.upgrade() {
            if state
                .controls
                .get(&job_id)
                .is_some_and(|control| control.same_channel(&own))
            {
                state.controls.remove(&job_id);
            }
        }
        result
    }

    fn cancel(&self, job_id: JobId) -> bool {
        let mut state = self.state.lock();
        if state.controls.remove(&job_id).is_some() {
            state.cancelled.push(job_id);
            true
        } else {
            false
        }
    }

    fn cancel_all(&self) -> usize {
        let mut state = self.state.lock();
        let ids: Vec<JobId> = state.controls.drain().map(|(id, _)| id).collect();
        state.cancelled.extend(&ids);
        ids.len()
    }
}

/// 8 cores, no GPU, 16 GiB.
pub fn snapshot() -> HardwareSnapshot {
    HardwareSnapshot {
        cpu: CpuInfo {
            cores: 8,
            threads: 16,
            model: "Test CPU".into(),
        },
        gpu: GpuSet::default(),
        memory: MemoryInfo {
            total: 16 * GIB,
            available: 16 * GIB,
        },
        platform: "linux".into(),
    }
}

/// A scheduler with a fixed concurrency limit over a fake transcoder.
pub fn spawn(max_concurrent_jobs: usize) -> (SchedulerHandle, Arc<FakeTranscoder>) {
    spawn_with(fixed(max_concurrent_jobs))
}

pub fn spawn_with(options: SchedulerOptions) -> (SchedulerHandle, Arc<FakeTranscoder>) {
    spawn_over(
        options,
        Arc::new(HardwareProfiler::with_snapshot(snapshot())),
        FakeTranscoder::default(),
    )
}

pub fn spawn_over(
    options: SchedulerOptions,
    profiler: Arc<HardwareProfiler>,
    fake: FakeTranscoder,
) -> (SchedulerHandle, Arc<FakeTranscoder>) {
    let fake = Arc::new(fake);
    let handle = Scheduler::spawn(options, profiler, fake.clone(), Arc::new(EventBus::new(1024)));
    (handle, fake)
}

/// Options with a fixed limit and a fast tick.
pub fn fixed(max_concurrent_jobs: usize) -> SchedulerOptions {
    SchedulerOptions {
        max_concurrent_jobs,
        auto_detect_hardware: false,
        tick_interval: Duration::from_millis(10),
        ..SchedulerOptions::default()
    }
}

/// `n` valid mp3 jobs with known 50 MB sources.
pub fn specs(n: usize) -> Vec<JobSpec> {
    (0..n)
        .map(|i| {
            JobSpec::new(format!("/media/track{i}.wav"), "mp3", "high").with_media(
                MediaDescriptor {
                    size: 50 * 1024 * 1024,
                    duration_secs: 180.0,
                    has_audio: true,
                    ..Default::default()
                },
            )
        })
        .collect()
}

/// Poll the scheduler status until `pred` holds.
pub async fn wait_for_status(
    handle: &SchedulerHandle,
    pred: impl Fn(&QueueStatus) -> bool,
) -> QueueStatus {
    for _ in 0..500 {
        let status = handle.status().await.unwrap();
        if pred(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("status condition not met within 5s: {:?}", handle.status().await);
}

/// Poll one job record until `pred` holds.
pub async fn wait_for_job(handle: &SchedulerHandle, id: JobId, pred: impl Fn(&Job) -> bool) -> Job {
    for _ in 0..500 {
        if let Some(job) = handle.job(id).await.unwrap() {
            if pred(&job) {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job condition not met within 5s: {:?}", handle.job(id).await);
}

/// Everything buffered on `rx` so far.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<JobUpdate> {
    let mut updates = Vec::new();
    while let Ok(event) = rx.try_recv() {
        updates.push(event.update);
    }
    updates
}

/// The updates for one job, in publication order.
pub fn updates_for(updates: &[JobUpdate], id: JobId) -> Vec<JobUpdate> {
    updates.iter().filter(|u| u.job_id == id).cloned().collect()
}
