//! Core release logic.
//!
//! This module contains:
//! - ReleasePipeline: the stage-gated state machine
//! - ReleaseDefinition: YAML release definitions and wiring
//! - EventStore: append-only audit log per run
//! - StageFailure: why a gate did not pass
//! - CancellationToken: between-stage cancellation

pub mod cancellation;
pub mod definition;
pub mod event_store;
pub mod failure;
pub mod pipeline;

// Re-export commonly used types
pub use cancellation::CancellationToken;
pub use definition::{ReleaseDefinition, VersionSource};
pub use event_store::EventStore;
pub use failure::StageFailure;
pub use pipeline::{Collaborators, ReleasePipeline, RunReport, TagConflictPolicy};
