use std::sync::Arc;

use mf_core::{Error, Event, EventBus, JobId, Result};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::command::SchedulerCommand;
use crate::job::{Job, JobSpec, Removal, SubmitOutcome};
use crate::status::QueueStatus;

/// Cloneable handle for talking to a running scheduler actor.
///
/// Every method is a message to the actor, so calls from any number of
/// tasks are serialized against each other and against job completions.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    events: Arc<EventBus>,
}

impl SchedulerHandle {
    pub(crate) fn new(sender: mpsc::Sender<SchedulerCommand>, events: Arc<EventBus>) -> Self {
        Self { sender, events }
    }

    /// Receive every job update published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Queue a batch of jobs and start processing. Invalid descriptors are
    /// rejected individually; their valid siblings are still queued.
    pub async fn submit(&self, jobs: Vec<JobSpec>) -> Result<SubmitOutcome> {
        self.request(|reply| SchedulerCommand::Submit { jobs, reply })
            .await
    }

    /// Dequeue or cancel one job. Unknown ids are not an error.
    pub async fn remove(&self, job_id: JobId) -> Result<Removal> {
        self.request(|reply| SchedulerCommand::Remove { job_id, reply })
            .await
    }

    /// Stop admitting queued jobs. Running jobs keep running.
    pub async fn pause_all(&self) -> Result<()> {
        self.request(|reply| SchedulerCommand::PauseAll { reply })
            .await
    }

    pub async fn resume_all(&self) -> Result<()> {
        self.request(|reply| SchedulerCommand::ResumeAll { reply })
            .await
    }

    /// Cancel every queued and running job. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> Result<usize> {
        self.request(|reply| SchedulerCommand::CancelAll { reply })
            .await
    }

    /// Set an explicit concurrency limit, clamped to the supported range.
    /// Returns the limit now in effect.
    pub async fn set_max_concurrent_jobs(&self, max: usize) -> Result<usize> {
        self.request(|reply| SchedulerCommand::SetMaxConcurrent { max, reply })
            .await
    }

    /// Drop the records of finished jobs. Returns how many were dropped.
    pub async fn clear_finished(&self) -> Result<usize> {
        self.request(|reply| SchedulerCommand::ClearFinished { reply })
            .await
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        self.request(|reply| SchedulerCommand::Status { reply })
            .await
    }

    /// All job records in submission order.
    pub async fn jobs(&self) -> Result<Vec<Job>> {
        self.request(|reply| SchedulerCommand::Jobs { reply }).await
    }

    pub async fn job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.request(|reply| SchedulerCommand::Job { job_id, reply })
            .await
    }

    /// Cancel everything and stop the actor. Later calls fail.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| SchedulerCommand::Shutdown { reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| unavailable())?;
        rx.await.map_err(|_| unavailable())
    }
}

fn unavailable() -> Error {
    Error::Internal("scheduler is not running".into())
}
