//! Batch conversion: wire the profiler, driver, and scheduler together,
//! submit a set of inputs, and follow their updates to completion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mf_av::{ProcessDriver, ToolRegistry};
use mf_core::{Config, Error, EventBus, JobId, JobStatus, JobUpdate, Result};
use mf_hw::HardwareProfiler;
use mf_queue::{Job, JobSpec, Rejection, Scheduler, SchedulerHandle, SchedulerOptions};
use tokio::sync::broadcast::error::RecvError;

/// The long-lived pieces a scheduler runs on.
pub struct Engine {
    pub config: Config,
    pub driver: Arc<ProcessDriver>,
    pub profiler: Arc<HardwareProfiler>,
    pub events: Arc<EventBus>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let tools = ToolRegistry::discover(&config.tools);
        let events = Arc::new(EventBus::new(config.events.capacity.max(1)));
        Self {
            driver: Arc::new(ProcessDriver::new(tools)),
            profiler: Arc::new(HardwareProfiler::new()),
            events,
            config,
        }
    }

    /// Start a scheduler on the current runtime.
    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        Scheduler::spawn(
            SchedulerOptions::from(&self.config.scheduler),
            Arc::clone(&self.profiler),
            self.driver.clone(),
            Arc::clone(&self.events),
        )
    }
}

/// Build one job spec per input, attaching probed media details where the
/// probe succeeds. Unprobeable inputs are still submitted; the conversion
/// reports why they fail.
pub async fn prepare_specs(
    driver: &ProcessDriver,
    inputs: &[PathBuf],
    format: &str,
    quality: &str,
) -> Vec<JobSpec> {
    let mut specs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let spec = JobSpec::new(input.clone(), format, quality);
        let spec = match driver.probe(input).await {
            Ok(media) => spec.with_media(media),
            Err(e) => {
                tracing::warn!(input = %input.display(), "Probe failed: {e}");
                spec
            }
        };
        specs.push(spec);
    }
    specs
}

/// How a batch ended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub rejected: Vec<Rejection>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0 && self.rejected.is_empty()
    }

    fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            _ => {}
        }
    }
}

/// Submit `specs` and wait until every accepted job reaches a terminal
/// status, passing each of their updates to `on_update`.
pub async fn run_batch<F>(
    handle: &SchedulerHandle,
    specs: Vec<JobSpec>,
    mut on_update: F,
) -> Result<BatchSummary>
where
    F: FnMut(&JobUpdate, &Path),
{
    let inputs: HashMap<JobId, PathBuf> =
        specs.iter().map(|s| (s.id, s.input.clone())).collect();

    // Subscribe first so no update published during submission is missed.
    let mut rx = handle.subscribe();
    let outcome = handle.submit(specs).await?;

    let mut summary = BatchSummary {
        rejected: outcome.rejected,
        ..BatchSummary::default()
    };
    let mut pending: HashMap<JobId, PathBuf> = outcome
        .accepted
        .iter()
        .filter_map(|id| inputs.get(id).map(|input| (*id, input.clone())))
        .collect();

    while !pending.is_empty() {
        match rx.recv().await {
            Ok(event) => {
                let update = event.update;
                let Some(input) = pending.get(&update.job_id) else {
                    continue;
                };
                on_update(&update, input);
                if update.is_terminal() {
                    pending.remove(&update.job_id);
                    summary.record(update.status);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream lagged; reconciling from job records");
                let jobs = handle.jobs().await?;
                reconcile(&jobs, &mut pending, &mut summary, &mut on_update);
            }
            Err(RecvError::Closed) => {
                return Err(Error::Internal(
                    "event stream closed before the batch finished".into(),
                ));
            }
        }
    }

    Ok(summary)
}

/// Settle pending jobs whose terminal update was dropped from the stream.
fn reconcile<F>(
    jobs: &[Job],
    pending: &mut HashMap<JobId, PathBuf>,
    summary: &mut BatchSummary,
    on_update: &mut F,
) where
    F: FnMut(&JobUpdate, &Path),
{
    for job in jobs {
        if !job.status.is_terminal() {
            continue;
        }
        let Some(input) = pending.remove(&job.id) else {
            continue;
        };
        let mut update = JobUpdate::status(job.id, job.status, job.progress);
        update.error = job.error.clone();
        on_update(&update, &input);
        summary.record(job.status);
    }
}
