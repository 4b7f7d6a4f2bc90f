//! Job event system.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel. Subscribers that
//! fall behind see `Lagged` and re-read job records instead. Every event carries a [`JobUpdate`]: the job's status, its progress, and
//! the optional speed, ETA, and error text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::JobId;
use crate::media::JobStatus;

// ---------------------------------------------------------------------------
// Eta
// ---------------------------------------------------------------------------

/// Estimated time remaining for a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "secs", rename_all = "snake_case")]
pub enum Eta {
    /// No progress has been observed yet.
    Calculating,
    /// The linear extrapolation says the job is already due.
    AlmostDone,
    /// Whole seconds remaining.
    Remaining(u64),
}

impl Eta {
    /// Extrapolate linearly: `elapsed / progress * 100 - elapsed`.
    pub fn estimate(elapsed: Duration, progress: f64) -> Self {
        if progress <= 0.0 || !progress.is_finite() {
            return Self::Calculating;
        }
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let remaining_ms = elapsed_ms / progress * 100.0 - elapsed_ms;
        if remaining_ms <= 0.0 {
            Self::AlmostDone
        } else {
            Self::Remaining((remaining_ms / 1000.0).floor() as u64)
        }
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Calculating => write!(f, "Calculating..."),
            Self::AlmostDone => write!(f, "Almost done..."),
            Self::Remaining(secs) => {
                let minutes = secs / 60;
                let hours = minutes / 60;
                if hours > 0 {
                    write!(f, "{hours}h {}m", minutes % 60)
                } else if minutes > 0 {
                    write!(f, "{minutes}m {}s", secs % 60)
                } else {
                    write!(f, "{secs}s")
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// JobUpdate
// ---------------------------------------------------------------------------

/// A status or progress change for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    /// Encoding speed as a multiple of real time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<Eta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobUpdate {
    /// A bare status transition with no speed/ETA/error.
    pub fn status(job_id: JobId, status: JobStatus, progress: f64) -> Self {
        Self {
            job_id,
            status,
            progress,
            speed: None,
            eta: None,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped job update ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub update: JobUpdate,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(update: JobUpdate) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            update,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel for job updates.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size. A capacity of
    /// 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an update to all current subscribers.
    pub fn publish(&self, update: JobUpdate) {
        // Ignore send errors (no subscribers).
        let _ = self.tx.send(Event::new(update));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
