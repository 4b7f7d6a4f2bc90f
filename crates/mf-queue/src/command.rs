use mf_core::{JobId, Result};
use mf_av::ProgressSample;
use tokio::sync::oneshot;

use crate::job::{Job, JobSpec, Removal, SubmitOutcome};
use crate::status::QueueStatus;

/// Requests sent from a [`SchedulerHandle`](crate::SchedulerHandle) to the
/// scheduler actor.
#[derive(Debug)]
pub enum SchedulerCommand {
    Submit {
        jobs: Vec<JobSpec>,
        reply: oneshot::Sender<SubmitOutcome>,
    },

    Remove {
        job_id: JobId,
        reply: oneshot::Sender<Removal>,
    },

    PauseAll { reply: oneshot::Sender<()> },

    ResumeAll { reply: oneshot::Sender<()> },

    CancelAll { reply: oneshot::Sender<usize> },

    SetMaxConcurrent {
        max: usize,
        reply: oneshot::Sender<usize>,
    },

    ClearFinished { reply: oneshot::Sender<usize> },

    Status { reply: oneshot::Sender<QueueStatus> },

    Jobs { reply: oneshot::Sender<Vec<Job>> },

    Job {
        job_id: JobId,
        reply: oneshot::Sender<Option<Job>>,
    },

    Shutdown { reply: oneshot::Sender<()> },
}

/// Notifications from spawned conversion tasks back to the actor.
///
/// `run` is the admission serial of the run that sent the message, so a run
/// that outlives its removal cannot act on a resubmitted job with the same id.
#[derive(Debug)]
pub(crate) enum JobMessage {
    Progress {
        job_id: JobId,
        run: u64,
        sample: ProgressSample,
    },
    Finished {
        job_id: JobId,
        run: u64,
        result: Result<()>,
    },
}
