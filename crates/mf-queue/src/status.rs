use std::fmt;

use serde::{Deserialize, Serialize};

/// Global state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Nothing queued or running.
    Idle,
    /// Admitting queued jobs as slots free up.
    Processing,
    /// Not admitting; running jobs continue underneath.
    Paused,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Point-in-time summary of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Job records currently held, in any state.
    pub total: usize,
    /// Jobs occupying a running slot (`running` or `paused`).
    pub running: usize,
    pub queued: usize,
    /// Jobs in a terminal state.
    pub finished: usize,
    pub state: SchedulerState,
    pub paused: bool,
    pub max_concurrent_jobs: usize,
}

impl QueueStatus {
    /// No queued or running work remains.
    pub fn is_drained(&self) -> bool {
        self.running == 0 && self.queued == 0
    }
}
