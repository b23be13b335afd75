//! Release stages and their per-stage outcomes.
//!
//! Stages run in a fixed order. Each executed stage produces exactly one
//! `StageOutcome`; the ordered list of outcomes is the audit trail of a run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A gate in the release pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Read-only check against the production registry
    Preflight,

    /// Local test suite against the source checkout
    Test,

    /// Build the distributable artifact set
    Build,

    /// Upload the artifact set to the staging registry
    PublishStaging,

    /// Install from staging and re-run the test suite
    Verify,

    /// Create the immutable version tag
    Tag,

    /// Upload the artifact set to the production registry
    PublishProduction,
}

impl Stage {
    /// All stages in execution order
    pub const ORDER: [Stage; 7] = [
        Stage::Preflight,
        Stage::Test,
        Stage::Build,
        Stage::PublishStaging,
        Stage::Verify,
        Stage::Tag,
        Stage::PublishProduction,
    ];

    /// The stage that follows this one, if any
    pub fn next(self) -> Option<Stage> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    /// Stable snake_case name (matches the serialized form)
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::Test => "test",
            Stage::Build => "build",
            Stage::PublishStaging => "publish_staging",
            Stage::Verify => "verify",
            Stage::Tag => "tag",
            Stage::PublishProduction => "publish_production",
        }
    }

    /// Whether entering this stage can change external state
    pub fn has_side_effects(self) -> bool {
        matches!(
            self,
            Stage::PublishStaging | Stage::Tag | Stage::PublishProduction
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet entered
    #[default]
    Pending,

    /// Collaborator call in flight
    Running,

    /// Gate passed
    Succeeded,

    /// Gate failed; the run aborted here
    Failed,

    /// Not executed because an earlier stage ended the run
    Skipped,
}

/// Result of a single executed stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,

    /// Free-text diagnostic (NO secrets)
    pub detail: String,

    /// Wall time spent in the stage
    pub duration_ms: Option<u64>,
}

impl StageOutcome {
    pub fn succeeded(stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            detail: detail.into(),
            duration_ms: None,
        }
    }

    pub fn failed(stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            detail: detail.into(),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}
