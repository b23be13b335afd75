//! Collaborator interfaces for the release pipeline.
//!
//! The pipeline delegates all real work (testing, building, uploading,
//! tagging) to the collaborators defined here. Each trait has a
//! subprocess-backed implementation driven by the release definition;
//! tests substitute in-memory fakes.

pub mod builder;
pub mod command;
pub mod credentials;
pub mod git;
pub mod registry;
pub mod verifier;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Artifact, ArtifactSet, Credential, RegistryTarget};

pub use builder::CommandArtifactBuilder;
pub use command::{CommandOutput, CommandSpec};
pub use credentials::{CredentialEnv, EnvCredentialSource, StaticCredentialSource};
pub use git::GitTagService;
pub use registry::CommandRegistryClient;
pub use verifier::CommandVerificationRunner;

/// Failure reported by a collaborator call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("{reason}")]
    Failed { reason: String },

    #[error("{operation} timed out after {seconds}s")]
    TimedOut { operation: String, seconds: u64 },

    #[error("{operation} panicked")]
    Panicked { operation: String },
}

impl CollaboratorError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Failure reported by the tag service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("tag '{tag}' already exists")]
    AlreadyExists { tag: String },

    #[error(transparent)]
    Other(#[from] CollaboratorError),
}

/// What the verification runner should test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationTarget {
    /// The source checkout as-is
    LocalSource { path: PathBuf },

    /// A package installed by name/version from a registry
    InstalledPackage {
        name: String,
        version: String,
        registry_endpoint: String,
    },
}

/// Runs the project's test suite
#[async_trait]
pub trait VerificationRunner: Send + Sync {
    async fn run(&self, target: &VerificationTarget) -> Result<(), CollaboratorError>;
}

/// Turns a source tree into distributable files
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn build(&self, source: &Path) -> Result<Vec<Artifact>, CollaboratorError>;
}

/// A package registry reached under one identity
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Which registry this client uploads to
    fn target(&self) -> RegistryTarget;

    /// Install endpoint (index URL) for this registry
    fn endpoint(&self) -> &str;

    /// Upload the artifact set under the given credential
    async fn upload(
        &self,
        credential: &Credential,
        artifacts: &ArtifactSet,
    ) -> Result<(), CollaboratorError>;

    /// Whether `name==version` is already published
    async fn contains(&self, name: &str, version: &str) -> Result<bool, CollaboratorError>;
}

/// Creates and resolves immutable version tags
#[async_trait]
pub trait TagService: Send + Sync {
    /// Create `tag_name` pointing at `source_ref`; fails if it exists
    async fn create_tag(&self, source_ref: &str, tag_name: &str) -> Result<(), TagError>;

    /// Commit the tag points at, or None if the tag does not exist
    async fn resolve(&self, tag_name: &str) -> Result<Option<String>, CollaboratorError>;
}

/// Hands out the credential for a registry target when its stage begins
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential(&self, target: RegistryTarget) -> Result<Credential, CollaboratorError>;
}
