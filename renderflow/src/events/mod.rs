//! Append-only event log.
//!
//! Entries serve two purposes: the audit/progress trail polled by
//! clients, and the staleness signal for lease recovery — the latest
//! entry's timestamp is the last observed sign of life for a run.

use serde::{Deserialize, Serialize};

use crate::phase::StageId;
use crate::utils::{now, Timestamp};

/// One append-only log entry. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// The step the event belongs to.
    pub step: u32,
    /// The event type (e.g. "stage.started", "item.retry").
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Optional progress in [0.0, 1.0].
    pub progress: Option<f64>,
    /// When the event occurred.
    pub timestamp: Timestamp,
}

impl EventLogEntry {
    /// Creates a new entry stamped with the current time.
    #[must_use]
    pub fn new(step: u32, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step,
            kind: kind.into(),
            message: message.into(),
            progress: None,
            timestamp: now(),
        }
    }

    /// Attaches a progress value.
    #[must_use]
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Creates a "stage.started" entry.
    #[must_use]
    pub fn stage_started(stage: StageId) -> Self {
        Self::new(stage.step(), "stage.started", format!("stage '{stage}' started"))
            .with_progress(0.0)
    }

    /// Creates a "stage.completed" entry.
    #[must_use]
    pub fn stage_completed(stage: StageId) -> Self {
        Self::new(stage.step(), "stage.completed", format!("stage '{stage}' completed"))
            .with_progress(1.0)
    }

    /// Creates a "stage.failed" entry.
    #[must_use]
    pub fn stage_failed(stage: StageId, error: &str) -> Self {
        Self::new(
            stage.step(),
            "stage.failed",
            format!("stage '{stage}' failed: {error}"),
        )
    }

    /// Creates a "stage.heartbeat" entry. Emitted at wave boundaries so
    /// the lease stays observably fresh during long batches.
    #[must_use]
    pub fn heartbeat(stage: StageId, progress: f64) -> Self {
        Self::new(stage.step(), "stage.heartbeat", format!("stage '{stage}' heartbeat"))
            .with_progress(progress)
    }

    /// Creates a "gate.failed" entry.
    #[must_use]
    pub fn gate_failed(stage: StageId, blocking: usize) -> Self {
        Self::new(
            stage.step(),
            "gate.failed",
            format!("gate for '{stage}' failed with {blocking} blocking item(s)"),
        )
    }

    /// Creates an "item.retry" entry.
    #[must_use]
    pub fn item_retry(stage: StageId, item_id: &str, attempt: u32, delay_ms: u64) -> Self {
        Self::new(
            stage.step(),
            "item.retry",
            format!("item '{item_id}' scheduled for attempt {attempt} in {delay_ms}ms"),
        )
    }

    /// Creates an "item.blocked" entry.
    #[must_use]
    pub fn item_blocked(stage: StageId, item_id: &str) -> Self {
        Self::new(
            stage.step(),
            "item.blocked",
            format!("item '{item_id}' exhausted retries, blocked for human review"),
        )
    }

    /// Creates a "manual.approved" audit entry.
    #[must_use]
    pub fn manual_approval(step: u32, detail: &str) -> Self {
        Self::new(step, "manual.approved", format!("manual approval: {detail}"))
    }

    /// Creates a "pipeline.reset" audit entry.
    #[must_use]
    pub fn reset(detail: &str) -> Self {
        Self::new(0, "pipeline.reset", format!("pipeline reset: {detail}"))
    }

    /// Creates a "pipeline.paused" entry.
    #[must_use]
    pub fn paused(step: u32) -> Self {
        Self::new(step, "pipeline.paused", "pipeline paused")
    }

    /// Creates a "pipeline.resumed" entry.
    #[must_use]
    pub fn resumed(step: u32) -> Self {
        Self::new(step, "pipeline.resumed", "pipeline resumed")
    }
}
