//! The persisted pipeline run record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::outputs::{AssetRef, StageOutput};
use crate::phase::{Phase, StageId};
use crate::utils::{generate_id, now, Timestamp};

/// Run-level state orthogonal to the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Normal operation.
    #[default]
    Active,
    /// Cooperative pause; honoured at stage entry and wave boundaries.
    Paused,
    /// Terminal; no further work accepted.
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Persisted record of one pipeline's progress.
///
/// Invariant: `phase` and `current_step` always satisfy the contract
/// mapping; the store's `commit_transition` is the only writer of either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Stable run identifier.
    pub id: String,
    /// Owning identity, checked on every operation.
    pub owner: String,
    /// Current phase.
    pub phase: Phase,
    /// Current step; always `phase.step()`.
    pub current_step: u32,
    /// The original input asset. Explicitly preserved across reset.
    pub source_ref: AssetRef,
    /// Per-stage outputs, tag-validated on read.
    #[serde(default)]
    pub step_outputs: HashMap<StageId, StageOutput>,
    /// Per-stage attempt counters for stage-level (not item-level) retries.
    #[serde(default)]
    pub stage_attempts: HashMap<StageId, u32>,
    /// Last pipeline-level error, human-readable.
    pub last_error: Option<String>,
    /// Run-level state.
    pub run_state: RunState,
    /// Lease token while a stage is running.
    pub job_token: Option<String>,
    /// Lease heartbeat.
    pub heartbeat_at: Option<Timestamp>,
    /// When the run was paused, if it is.
    pub paused_at: Option<Timestamp>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

impl PipelineRun {
    /// Creates a new run at (Created, 0).
    #[must_use]
    pub fn new(owner: impl Into<String>, source_ref: AssetRef) -> Self {
        let ts = now();
        Self {
            id: generate_id(),
            owner: owner.into(),
            phase: Phase::Created,
            current_step: 0,
            source_ref,
            step_outputs: HashMap::new(),
            stage_attempts: HashMap::new(),
            last_error: None,
            run_state: RunState::Active,
            job_token: None,
            heartbeat_at: None,
            paused_at: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    /// Returns true if the run accepts work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.run_state == RunState::Active && !self.phase.is_terminal()
    }

    /// Returns the stored output for a stage, if present.
    #[must_use]
    pub fn output_for(&self, stage: StageId) -> Option<&StageOutput> {
        self.step_outputs.get(&stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run() -> PipelineRun {
        PipelineRun::new("owner-1", AssetRef::new("sources", "p1/source.png"))
    }

    #[test]
    fn test_new_run_initial_state() {
        let run = sample_run();
        assert_eq!(run.phase, Phase::Created);
        assert_eq!(run.current_step, 0);
        assert_eq!(run.run_state, RunState::Active);
        assert!(run.job_token.is_none());
        assert!(run.is_active());
    }

    #[test]
    fn test_phase_step_invariant_on_creation() {
        let run = sample_run();
        assert_eq!(run.current_step, run.phase.step());
    }

    #[test]
    fn test_paused_run_not_active() {
        let mut run = sample_run();
        run.run_state = RunState::Paused;
        assert!(!run.is_active());
    }

    #[test]
    fn test_complete_run_not_active() {
        let mut run = sample_run();
        run.phase = Phase::Complete;
        run.current_step = 6;
        assert!(!run.is_active());
    }

    #[test]
    fn test_run_serialization_round_trip() {
        let mut run = sample_run();
        run.step_outputs.insert(
            StageId::Stylize,
            StageOutput::Stylize {
                styled_ref: AssetRef::new("styled", "p1/styled.png"),
            },
        );
        let json = serde_json::to_string(&run).unwrap();
        let back: PipelineRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
    }
}
