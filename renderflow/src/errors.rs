//! Error taxonomy for the orchestration engine.
//!
//! Every abort carries a human-readable message plus a machine-readable
//! classification (`code()`); nothing fails silently. Per-item failures
//! are isolated by the batch dispatcher and never surface here directly.

use thiserror::Error;

use crate::phase::{Phase, StageId};

/// The main error type for orchestration operations.
#[derive(Debug, Clone, Error)]
pub enum RenderflowError {
    /// A stage handler was invoked while the run's phase is outside the
    /// handler's allowed set. Not auto-retried.
    #[error(
        "phase mismatch for stage '{stage}': current phase is '{current}', expected one of {expected:?}"
    )]
    PhaseMismatch {
        /// The stage that was invoked.
        stage: StageId,
        /// The run's current phase.
        current: Phase,
        /// Phases from which the stage may legally be entered.
        expected: Vec<Phase>,
    },

    /// A (phase, step) pair violates the fixed contract mapping.
    #[error("contract violation: phase '{phase}' requires step {expected_step}, found {step}")]
    ContractViolation {
        /// The persisted phase.
        phase: Phase,
        /// The persisted step.
        step: u32,
        /// The step the contract binds the phase to.
        expected_step: u32,
    },

    /// A fresh lease was detected on the stage; the caller should poll.
    #[error("stage '{stage}' is already running (last activity {since})")]
    AlreadyRunning {
        /// The stage holding the lease.
        stage: StageId,
        /// ISO timestamp of the latest observed activity.
        since: String,
    },

    /// A gate precondition was unmet; the phase reverts to review.
    #[error("gate for stage '{stage}' failed: {blocking} item(s) not fully approved")]
    GateFailed {
        /// The stage whose gate rejected entry.
        stage: StageId,
        /// Number of incomplete work items.
        blocking: usize,
    },

    /// QA rejected a generation attempt. Retried up to the budget, then
    /// escalated.
    #[error("qa rejected item '{item_id}': {summary}")]
    QaRejected {
        /// The rejected work item.
        item_id: String,
        /// Top-ranked rejection reason.
        summary: String,
    },

    /// A work item exhausted its automatic retry budget. Terminal to
    /// automation; only manual approval advances it.
    #[error("item '{item_id}' exceeded the maximum attempts and is blocked for human review")]
    MaxAttemptsExceeded {
        /// The blocked work item.
        item_id: String,
    },

    /// Generation or storage collaborator failed. Isolated per item.
    #[error("upstream failure in stage '{stage}': {reason}")]
    UpstreamFailure {
        /// The stage during which the failure occurred.
        stage: StageId,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A stage's required input is missing; the stage aborts and reverts.
    #[error("stage '{stage}' is missing required input: {what}")]
    MissingInput {
        /// The aborting stage.
        stage: StageId,
        /// Description of the missing input.
        what: String,
    },

    /// The pipeline run does not exist.
    #[error("pipeline '{pipeline_id}' not found")]
    PipelineNotFound {
        /// The requested pipeline id.
        pipeline_id: String,
    },

    /// The work item does not exist.
    #[error("work item '{item_id}' not found")]
    ItemNotFound {
        /// The requested item id.
        item_id: String,
    },

    /// The caller's identity does not own the pipeline.
    #[error("caller '{owner}' is not authorized for pipeline '{pipeline_id}'")]
    Unauthorized {
        /// The resolved caller identity.
        owner: String,
        /// The pipeline the caller attempted to touch.
        pipeline_id: String,
    },

    /// The run is paused; work is refused at stage entry.
    #[error("pipeline '{pipeline_id}' is paused")]
    Paused {
        /// The paused pipeline id.
        pipeline_id: String,
    },

    /// The run is aborted; no further work is accepted.
    #[error("pipeline '{pipeline_id}' is aborted")]
    Aborted {
        /// The aborted pipeline id.
        pipeline_id: String,
    },

    /// A persisted stage output failed tag validation on read.
    #[error("stored output for stage '{stage}' has mismatched tag '{found}'")]
    CorruptOutput {
        /// The stage key the output was stored under.
        stage: StageId,
        /// The tag actually found in the payload.
        found: String,
    },

    /// Store-level failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RenderflowError {
    /// Machine-readable classification code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PhaseMismatch { .. } => "PHASE_MISMATCH",
            Self::ContractViolation { .. } => "CONTRACT_VIOLATION",
            Self::AlreadyRunning { .. } => "ALREADY_RUNNING",
            Self::GateFailed { .. } => "GATE_FAILED",
            Self::QaRejected { .. } => "QA_REJECTED",
            Self::MaxAttemptsExceeded { .. } => "MAX_ATTEMPTS_EXCEEDED",
            Self::UpstreamFailure { .. } => "UPSTREAM_FAILURE",
            Self::MissingInput { .. } => "MISSING_INPUT",
            Self::PipelineNotFound { .. } => "PIPELINE_NOT_FOUND",
            Self::ItemNotFound { .. } => "ITEM_NOT_FOUND",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Paused { .. } => "PAUSED",
            Self::Aborted { .. } => "ABORTED",
            Self::CorruptOutput { .. } => "CORRUPT_OUTPUT",
            Self::Storage(_) => "STORAGE",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }

    /// Returns true if the caller may retry the same call later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning { .. }
                | Self::GateFailed { .. }
                | Self::UpstreamFailure { .. }
                | Self::Storage(_)
        )
    }

    /// Converts to a dictionary representation for audit payloads.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        })
    }
}

impl From<serde_json::Error> for RenderflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_mismatch_message_lists_expected() {
        let err = RenderflowError::PhaseMismatch {
            stage: StageId::Render,
            current: Phase::DetectPending,
            expected: vec![Phase::RenderPending],
        };
        let msg = err.to_string();
        assert!(msg.contains("render"));
        assert!(msg.contains("detect_pending"));
        assert_eq!(err.code(), "PHASE_MISMATCH");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_gate_failed_carries_blocking_count() {
        let err = RenderflowError::GateFailed {
            stage: StageId::Merge,
            blocking: 3,
        };
        assert!(err.to_string().contains('3'));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_to_dict() {
        let err = RenderflowError::AlreadyRunning {
            stage: StageId::Stylize,
            since: "2026-01-01T00:00:00+00:00".to_string(),
        };
        let dict = err.to_dict();
        assert_eq!(dict["code"], "ALREADY_RUNNING");
        assert_eq!(dict["retryable"], true);
    }

    #[test]
    fn test_codes_are_stable() {
        let err = RenderflowError::MaxAttemptsExceeded {
            item_id: "item-1".to_string(),
        };
        assert_eq!(err.code(), "MAX_ATTEMPTS_EXCEEDED");
    }
}
