//! Run state and reconstruction from events.
//!
//! A Run represents a single execution of the release pipeline for one
//! version. It is never resumed; a retry is a fresh run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType};
use super::release::RunResult;
use super::stage::{Stage, StageOutcome, StageStatus};

/// Identifying data recorded with `RunStarted`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHeader {
    pub package: String,
    pub version: String,
    pub tag: String,
    pub source_ref: String,
}

/// A release run as seen through its audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// What was being released
    pub header: RunHeader,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Outcomes of finished stages, in execution order
    pub outcomes: Vec<StageOutcome>,
}

impl Run {
    /// Create a new run
    pub fn new(id: Uuid, header: RunHeader) -> Self {
        Self {
            id,
            header,
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            outcomes: Vec::new(),
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self {
            id: first_event.run_id,
            header: RunHeader::default(),
            state: RunState::Running,
            started_at: first_event.timestamp,
            completed_at: None,
            outcomes: Vec::new(),
        };

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
                if let Some(header) = event
                    .data
                    .clone()
                    .and_then(|d| serde_json::from_value::<RunHeader>(d).ok())
                {
                    self.header = header;
                }
            }
            EventType::RunReleased => {
                self.state = RunState::Released {
                    tag: self.header.tag.clone(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunAborted => {
                let result = event
                    .data
                    .clone()
                    .and_then(|d| serde_json::from_value::<RunResult>(d).ok());
                self.state = match result {
                    Some(RunResult::Aborted {
                        failed_stage,
                        detail,
                        ..
                    }) => RunState::Aborted {
                        stage: Some(failed_stage),
                        detail,
                    },
                    _ => RunState::Aborted {
                        stage: event.stage,
                        detail: event.error.clone().unwrap_or_default(),
                    },
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StageStarted => {}
            EventType::StageCompleted | EventType::StageFailed | EventType::StageSkipped => {
                if let Some(stage) = event.stage {
                    self.outcomes.push(StageOutcome {
                        stage,
                        status: event.status,
                        detail: event
                            .error
                            .clone()
                            .unwrap_or_else(|| event.summary.clone()),
                        duration_ms: event.duration_ms,
                    });
                }
            }
        }
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    /// Status of a stage in this run
    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        self.outcomes
            .iter()
            .rev()
            .find(|o| o.stage == stage)
            .map(|o| o.status)
            .unwrap_or_default()
    }
}

/// State of a release run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing (or interrupted without a terminal event)
    #[default]
    Running,

    /// Version released and tagged
    Released { tag: String },

    /// Aborted at a stage
    Aborted { stage: Option<Stage>, detail: String },
}
