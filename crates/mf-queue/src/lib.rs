//! mf-queue: bounded-concurrency conversion scheduling.
//!
//! [`Scheduler::spawn`] starts an actor that owns the pending queue and the
//! running set, and returns a [`SchedulerHandle`] for submitting, pausing,
//! cancelling, and inspecting jobs. Per-job execution configs come from the
//! [`mf_hw::HardwareProfiler`]; conversions run through an
//! [`mf_av::Transcoder`]. Every status and progress change is published on
//! the shared [`mf_core::EventBus`].

pub mod command;
pub mod handle;
pub mod job;
pub mod scheduler;
pub mod status;

pub use handle::SchedulerHandle;
pub use job::{derive_output_path, Job, JobSpec, Rejection, Removal, SubmitOutcome};
pub use scheduler::{Scheduler, SchedulerOptions};
pub use status::{QueueStatus, SchedulerState};
