//! Work items: one generated asset instance subject to QA.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::outputs::AssetRef;
use super::qa::QaResult;
use crate::utils::{generate_id, now, Timestamp};

/// Directional variant of a per-area render. Panoramic merging needs both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Render facing into the area.
    Forward,
    /// Render facing back out of the area.
    Reverse,
}

impl Variant {
    /// Both directional variants, in render order.
    pub const ALL: [Self; 2] = [Self::Forward, Self::Reverse];
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Reverse => write!(f, "reverse"),
        }
    }
}

/// Lifecycle state of a work item.
///
/// pending → queued → processing → approved, or back through
/// rejected/needs_review while attempts remain, or blocked_for_human once
/// the budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Created, not yet scheduled.
    Pending,
    /// Scheduled into a wave.
    Queued,
    /// Generation or QA in flight.
    Processing,
    /// Terminal: passed QA or manually approved.
    Approved,
    /// Failed QA; eligible for automatic retry.
    Rejected,
    /// Failed QA with low confidence; eligible for automatic retry.
    NeedsReview,
    /// Terminal to automation: retry budget exhausted, human required.
    BlockedForHuman,
}

impl WorkItemStatus {
    /// Returns true if automation will not touch the item again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::BlockedForHuman)
    }

    /// Returns true if the item may be scheduled for another attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Pending | Self::Rejected | Self::NeedsReview)
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsReview => "needs_review",
            Self::BlockedForHuman => "blocked_for_human",
        };
        write!(f, "{name}")
    }
}

/// One generated asset instance, created when the render stage begins and
/// deleted only on pipeline reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable item identifier.
    pub id: String,
    /// Owning pipeline.
    pub pipeline_id: String,
    /// The area this render belongs to.
    pub area_id: String,
    /// Directional variant.
    pub variant: Variant,
    /// Current lifecycle state.
    pub status: WorkItemStatus,
    /// Attempts consumed so far. Never exceeds the configured maximum
    /// before the item is forced to `BlockedForHuman`.
    pub attempt_count: u32,
    /// Judgment of the latest attempt.
    pub qa_result: Option<QaResult>,
    /// Set by the audited manual-approval path, bypassing QA.
    pub locked_approved: bool,
    /// The latest generated asset, if any attempt produced one.
    pub asset_ref: Option<AssetRef>,
    /// Instruction seeded from the top-priority required change of the
    /// previous rejection.
    pub change_request: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

impl WorkItem {
    /// Creates a pending work item for an area variant.
    #[must_use]
    pub fn new(
        pipeline_id: impl Into<String>,
        area_id: impl Into<String>,
        variant: Variant,
    ) -> Self {
        let ts = now();
        Self {
            id: generate_id(),
            pipeline_id: pipeline_id.into(),
            area_id: area_id.into(),
            variant,
            status: WorkItemStatus::Pending,
            attempt_count: 0,
            qa_result: None,
            locked_approved: false,
            asset_ref: None,
            change_request: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    /// Returns true if the item counts as approved for gate purposes.
    #[must_use]
    pub fn is_gate_approved(&self) -> bool {
        self.status == WorkItemStatus::Approved || self.locked_approved
    }

    /// Marks the item approved and attaches the QA result.
    pub fn approve(&mut self, qa: QaResult) {
        self.status = WorkItemStatus::Approved;
        self.qa_result = Some(qa);
        self.updated_at = now();
    }

    /// Marks the item manually approved, bypassing QA.
    pub fn approve_manually(&mut self) {
        self.status = WorkItemStatus::Approved;
        self.locked_approved = true;
        self.updated_at = now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::qa::QaResult;

    #[test]
    fn test_new_item_is_pending() {
        let item = WorkItem::new("p1", "area-1", Variant::Forward);
        assert_eq!(item.status, WorkItemStatus::Pending);
        assert_eq!(item.attempt_count, 0);
        assert!(!item.is_gate_approved());
    }

    #[test]
    fn test_status_terminal() {
        assert!(WorkItemStatus::Approved.is_terminal());
        assert!(WorkItemStatus::BlockedForHuman.is_terminal());
        assert!(!WorkItemStatus::Rejected.is_terminal());
        assert!(WorkItemStatus::Rejected.is_retryable());
        assert!(!WorkItemStatus::Processing.is_retryable());
    }

    #[test]
    fn test_approve() {
        let mut item = WorkItem::new("p1", "area-1", Variant::Reverse);
        item.approve(QaResult::approved(0.9));
        assert!(item.is_gate_approved());
        assert!(!item.locked_approved);
    }

    #[test]
    fn test_manual_approve_sets_lock() {
        let mut item = WorkItem::new("p1", "area-1", Variant::Forward);
        item.status = WorkItemStatus::BlockedForHuman;
        item.approve_manually();
        assert!(item.locked_approved);
        assert!(item.is_gate_approved());
        // No QA result attached; the override bypasses QA entirely.
        assert!(item.qa_result.is_none());
    }

    #[test]
    fn test_status_serialize_snake_case() {
        let json = serde_json::to_string(&WorkItemStatus::BlockedForHuman).unwrap();
        assert_eq!(json, r#""blocked_for_human""#);
    }
}
