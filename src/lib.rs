//! relgate - Stage-gated package release pipeline
//!
//! Releases a package version through a fixed sequence of gates and
//! refuses to advance past any gate that fails:
//!
//! ```text
//! preflight → test → build → publish_staging → verify → tag → publish_production
//! ```
//!
//! The release is tagged only after the artifacts installed from the
//! staging registry have passed the test suite, and production only ever
//! receives artifacts that were staged and verified in the same run.
//!
//! # Modules
//!
//! - `adapters`: Collaborator traits and their command/git/HTTP implementations
//! - `core`: The release state machine, definitions, and the event store
//! - `domain`: Data structures (Stage, ReleaseRequest, ArtifactSet, Event, Run)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Release the version declared in pyproject.toml at HEAD
//! relgate release
//!
//! # Check run status
//! relgate status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{Collaborators, ReleaseDefinition, ReleasePipeline, RunReport, TagConflictPolicy};
pub use domain::{ReleaseRequest, RunResult, Stage, StageOutcome, StageStatus};
