//! The phase/step contract: the fixed state machine every pipeline follows.
//!
//! Phases form an append-only enumeration, each bound 1:1 to a step
//! integer for the lifetime of a pipeline version. Phase and step are only
//! ever persisted together; [`PhaseContract`] is the sole authority on
//! which stage may run in which phase.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::RenderflowError;

/// A named pipeline state.
///
/// Several phases can share a step (pending/running/review variants of the
/// same stage), but every phase maps to exactly one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Run exists, nothing started.
    Created,
    /// Ready for the stylize stage.
    StylizePending,
    /// Stylize lease held.
    StylizeRunning,
    /// Styled image ready, awaiting area detection.
    DetectPending,
    /// Detection lease held.
    DetectRunning,
    /// Areas known, awaiting per-area renders.
    RenderPending,
    /// Render batch in flight.
    RenderRunning,
    /// Render items blocked for human review.
    RenderReview,
    /// All renders approved, awaiting panoramic merge.
    MergePending,
    /// Merge lease held.
    MergeRunning,
    /// Panoramas ready, awaiting final composite.
    CompositePending,
    /// Composite lease held.
    CompositeRunning,
    /// Terminal completion phase.
    Complete,
}

impl Phase {
    /// Returns the step integer this phase is bound to.
    #[must_use]
    pub fn step(self) -> u32 {
        match self {
            Self::Created => 0,
            Self::StylizePending | Self::StylizeRunning => 1,
            Self::DetectPending | Self::DetectRunning => 2,
            Self::RenderPending | Self::RenderRunning | Self::RenderReview => 3,
            Self::MergePending | Self::MergeRunning => 4,
            Self::CompositePending | Self::CompositeRunning => 5,
            Self::Complete => 6,
        }
    }

    /// Returns true if this phase is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Returns true if this phase marks a stage lease as held.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::StylizeRunning
                | Self::DetectRunning
                | Self::RenderRunning
                | Self::MergeRunning
                | Self::CompositeRunning
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::StylizePending => "stylize_pending",
            Self::StylizeRunning => "stylize_running",
            Self::DetectPending => "detect_pending",
            Self::DetectRunning => "detect_running",
            Self::RenderPending => "render_pending",
            Self::RenderRunning => "render_running",
            Self::RenderReview => "render_review",
            Self::MergePending => "merge_pending",
            Self::MergeRunning => "merge_running",
            Self::CompositePending => "composite_pending",
            Self::CompositeRunning => "composite_running",
            Self::Complete => "complete",
        };
        write!(f, "{name}")
    }
}

/// The five pipeline stages, in step order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Source image to styled image (step 1).
    Stylize,
    /// Styled image to detected sub-areas (step 2).
    Detect,
    /// Per-area directional renders (step 3).
    Render,
    /// Panoramic merges (step 4).
    Merge,
    /// Final composite (step 5).
    Composite,
}

impl StageId {
    /// All stages in execution order.
    pub const ALL: [Self; 5] = [
        Self::Stylize,
        Self::Detect,
        Self::Render,
        Self::Merge,
        Self::Composite,
    ];

    /// Returns the step integer this stage executes at.
    #[must_use]
    pub fn step(self) -> u32 {
        match self {
            Self::Stylize => 1,
            Self::Detect => 2,
            Self::Render => 3,
            Self::Merge => 4,
            Self::Composite => 5,
        }
    }

    /// Resolves a stage from its step integer.
    #[must_use]
    pub fn from_step(step: u32) -> Option<Self> {
        match step {
            1 => Some(Self::Stylize),
            2 => Some(Self::Detect),
            3 => Some(Self::Render),
            4 => Some(Self::Merge),
            5 => Some(Self::Composite),
            _ => None,
        }
    }

    /// Phases from which this stage may legally be entered.
    ///
    /// Merge additionally accepts `RenderReview` so a gate re-check can
    /// happen after blocked items were manually resolved.
    #[must_use]
    pub fn entry_phases(self) -> &'static [Phase] {
        match self {
            Self::Stylize => &[Phase::Created, Phase::StylizePending],
            Self::Detect => &[Phase::DetectPending],
            Self::Render => &[Phase::RenderPending],
            Self::Merge => &[Phase::MergePending, Phase::RenderReview],
            Self::Composite => &[Phase::CompositePending],
        }
    }

    /// The phase marking this stage's lease as held.
    #[must_use]
    pub fn running_phase(self) -> Phase {
        match self {
            Self::Stylize => Phase::StylizeRunning,
            Self::Detect => Phase::DetectRunning,
            Self::Render => Phase::RenderRunning,
            Self::Merge => Phase::MergeRunning,
            Self::Composite => Phase::CompositeRunning,
        }
    }

    /// The phase committed when this stage succeeds.
    #[must_use]
    pub fn success_phase(self) -> Phase {
        match self {
            Self::Stylize => Phase::DetectPending,
            Self::Detect => Phase::RenderPending,
            Self::Render => Phase::MergePending,
            Self::Merge => Phase::CompositePending,
            Self::Composite => Phase::Complete,
        }
    }

    /// The retryable equivalent the phase reverts to on stage failure.
    #[must_use]
    pub fn retry_phase(self) -> Phase {
        match self {
            Self::Stylize => Phase::StylizePending,
            Self::Detect => Phase::DetectPending,
            Self::Render => Phase::RenderPending,
            Self::Merge => Phase::MergePending,
            Self::Composite => Phase::CompositePending,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stylize => write!(f, "stylize"),
            Self::Detect => write!(f, "detect"),
            Self::Render => write!(f, "render"),
            Self::Merge => write!(f, "merge"),
            Self::Composite => write!(f, "composite"),
        }
    }
}

/// Validates stage entry and phase transitions against the fixed contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseContract;

impl PhaseContract {
    /// Checks that `stage` may be entered while the run sits at `current`.
    ///
    /// Fails with [`RenderflowError::PhaseMismatch`] carrying the expected
    /// phase set; no mutation occurs on failure.
    pub fn validate_entry(stage: StageId, current: Phase) -> Result<(), RenderflowError> {
        if stage.entry_phases().contains(&current) {
            return Ok(());
        }
        Err(RenderflowError::PhaseMismatch {
            stage,
            current,
            expected: stage.entry_phases().to_vec(),
        })
    }

    /// Checks that a (phase, step) pair satisfies the contract mapping.
    pub fn validate_pair(phase: Phase, step: u32) -> Result<(), RenderflowError> {
        if phase.step() == step {
            return Ok(());
        }
        Err(RenderflowError::ContractViolation {
            phase,
            step,
            expected_step: phase.step(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_determines_step() {
        // Every phase maps to exactly one step; pending/running variants
        // of the same stage share it.
        assert_eq!(Phase::StylizePending.step(), 1);
        assert_eq!(Phase::StylizeRunning.step(), 1);
        assert_eq!(Phase::RenderReview.step(), 3);
        assert_eq!(Phase::Complete.step(), 6);
    }

    #[test]
    fn test_stage_step_round_trip() {
        for stage in StageId::ALL {
            assert_eq!(StageId::from_step(stage.step()), Some(stage));
        }
        assert_eq!(StageId::from_step(0), None);
        assert_eq!(StageId::from_step(9), None);
    }

    #[test]
    fn test_success_phase_advances_step() {
        for stage in StageId::ALL {
            assert_eq!(stage.success_phase().step(), stage.step() + 1);
        }
    }

    #[test]
    fn test_retry_phase_keeps_step() {
        for stage in StageId::ALL {
            assert_eq!(stage.retry_phase().step(), stage.step());
            assert!(!stage.retry_phase().is_running());
        }
    }

    #[test]
    fn test_validate_entry_accepts_pending() {
        assert!(PhaseContract::validate_entry(StageId::Render, Phase::RenderPending).is_ok());
        assert!(PhaseContract::validate_entry(StageId::Merge, Phase::RenderReview).is_ok());
    }

    #[test]
    fn test_validate_entry_rejects_wrong_phase() {
        let err = PhaseContract::validate_entry(StageId::Render, Phase::DetectPending)
            .unwrap_err();
        match err {
            RenderflowError::PhaseMismatch { current, expected, .. } => {
                assert_eq!(current, Phase::DetectPending);
                assert_eq!(expected, vec![Phase::RenderPending]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_pair() {
        assert!(PhaseContract::validate_pair(Phase::MergePending, 4).is_ok());
        assert!(PhaseContract::validate_pair(Phase::MergePending, 3).is_err());
    }

    #[test]
    fn test_phase_serialize_snake_case() {
        let json = serde_json::to_string(&Phase::RenderReview).unwrap();
        assert_eq!(json, r#""render_review""#);
        let back: Phase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Phase::RenderReview);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::MergeRunning.to_string(), "merge_running");
        assert_eq!(StageId::Composite.to_string(), "composite");
    }
}
