//! mf-core: shared types, IDs, errors, configuration, and the job event bus.
//!
//! This crate is the foundational dependency for all other mf-* crates,
//! providing the typed job identifier, a unified error type, media-domain
//! enums, application configuration, and a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use config::Config;
pub use error::{Error, FailureKind, Result};
pub use events::{Eta, Event, EventBus, JobUpdate};
pub use ids::*;
pub use media::*;
