//! Stage failures and their mapping onto the abort taxonomy.

use thiserror::Error;

use crate::adapters::CollaboratorError;
use crate::domain::{ArtifactSetError, FailureKind, RegistryTarget};

/// Why a stage gate failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageFailure {
    #[error("could not query production registry: {0}")]
    RegistryQuery(CollaboratorError),

    #[error("{version} is already on the production registry but tag '{tag}' {found}; operator action required")]
    PublishedWithoutTag {
        version: String,
        tag: String,
        found: String,
    },

    #[error("local tests failed: {0}")]
    Validation(CollaboratorError),

    #[error("build failed: {0}")]
    Build(CollaboratorError),

    #[error("build output rejected: {0}")]
    Artifacts(ArtifactSetError),

    #[error("{target} credential unavailable: {source}")]
    CredentialUnavailable {
        target: RegistryTarget,
        source: CollaboratorError,
    },

    #[error("{expected} stage received a {actual} credential")]
    CredentialMismatch {
        expected: RegistryTarget,
        actual: RegistryTarget,
    },

    #[error("production credential is identical to the staging credential")]
    SharedCredential,

    #[error("{target} publish failed: {source}")]
    Publish {
        target: RegistryTarget,
        source: CollaboratorError,
    },

    #[error("staging package failed verification: {0}")]
    Verification(CollaboratorError),

    #[error("tag '{tag}' already exists and retries are disabled")]
    TagExists { tag: String },

    #[error("tag '{tag}' already exists at {found}, expected {expected}; operator action required")]
    InconsistentTag {
        tag: String,
        expected: String,
        found: String,
    },

    #[error("tag creation failed: {0}")]
    Tag(CollaboratorError),

    #[error("cancelled before {stage}: {reason}")]
    Cancelled { stage: String, reason: String },
}

impl StageFailure {
    /// Category reported to the invoker
    pub fn kind(&self) -> FailureKind {
        match self {
            StageFailure::RegistryQuery(_) => FailureKind::Preflight,
            StageFailure::PublishedWithoutTag { .. } => FailureKind::TagConflict,
            StageFailure::Validation(_) => FailureKind::Validation,
            StageFailure::Build(_) | StageFailure::Artifacts(_) => FailureKind::Build,
            StageFailure::CredentialUnavailable { .. }
            | StageFailure::CredentialMismatch { .. }
            | StageFailure::SharedCredential => FailureKind::Credential,
            StageFailure::Publish { .. } => FailureKind::Publish,
            StageFailure::Verification(_) => FailureKind::Verification,
            StageFailure::TagExists { .. } | StageFailure::InconsistentTag { .. } => {
                FailureKind::TagConflict
            }
            StageFailure::Tag(_) => FailureKind::Tag,
            StageFailure::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    /// Whether a human has to reconcile external state before retrying
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            StageFailure::PublishedWithoutTag { .. } | StageFailure::InconsistentTag { .. }
        )
    }
}
