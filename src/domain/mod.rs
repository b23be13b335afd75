//! Domain types for the release gate.
//!
//! This module contains the core data structures:
//! - Stage: the ordered gates and their outcomes
//! - Release: requests, tags and terminal results
//! - Artifact: the built, read-only artifact set
//! - Credential: per-registry identities
//! - Events/Run: the audit trail

pub mod artifact;
pub mod credential;
pub mod events;
pub mod release;
pub mod run;
pub mod stage;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactSet, ArtifactSetError, ManifestEntry};
pub use credential::{Credential, RegistryTarget};
pub use events::{Event, EventType};
pub use release::{
    FailureKind, ReleaseRequest, ReleaseTag, RequestError, RunResult, DEFAULT_TAG_PREFIX,
};
pub use run::{Run, RunHeader, RunState};
pub use stage::{Stage, StageOutcome, StageStatus};
