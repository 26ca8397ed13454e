//! Bounded-retry accounting and terminal escalation.
//!
//! The policy owns exactly one decision: given a rejected attempt, either
//! schedule another attempt seeded by the top-priority required change,
//! or hand the item to a human. It must neither stall forever nor retry
//! indefinitely.

use serde::{Deserialize, Serialize};

use crate::model::{QaResult, WorkItem, WorkItemStatus};

/// What to do with a work item after a QA verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The attempt passed; the item is terminally approved.
    Approve,
    /// Schedule another attempt. Carries the attempt number the retry
    /// will be (1-indexed) and the instruction seeding it.
    Retry {
        /// The upcoming attempt number.
        next_attempt: u32,
        /// Instruction from the top-priority required change, if any.
        seed_change: Option<String>,
    },
    /// Budget exhausted; the item is blocked for human review.
    Escalate,
}

/// Bounded-retry policy with terminal escalation to human review.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryEscalationPolicy {
    /// Maximum automatic attempts per item.
    pub max_attempts: u32,
}

impl Default for RetryEscalationPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryEscalationPolicy {
    /// Creates a policy with the given attempt budget.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Decides the item's fate after a judged attempt.
    ///
    /// The caller has already counted the attempt on the item. At
    /// `attempt_count == max_attempts` a rejection becomes an escalation.
    #[must_use]
    pub fn decide(&self, item: &WorkItem, qa: &QaResult) -> PolicyDecision {
        if qa.is_approved() {
            return PolicyDecision::Approve;
        }
        if item.attempt_count >= self.max_attempts {
            return PolicyDecision::Escalate;
        }
        PolicyDecision::Retry {
            next_attempt: item.attempt_count + 1,
            seed_change: qa.top_change().map(|c| c.instruction.clone()),
        }
    }

    /// Applies a decision to the item's persisted fields. Attaches the
    /// QA result of the judged attempt; manual overrides never pass
    /// through here.
    pub fn apply(&self, item: &mut WorkItem, qa: QaResult, decision: &PolicyDecision) {
        match decision {
            PolicyDecision::Approve => {
                item.approve(qa);
            }
            PolicyDecision::Retry { seed_change, .. } => {
                item.status = if qa.confidence < 0.5 {
                    WorkItemStatus::NeedsReview
                } else {
                    WorkItemStatus::Rejected
                };
                item.change_request.clone_from(seed_change);
                item.qa_result = Some(qa);
            }
            PolicyDecision::Escalate => {
                item.status = WorkItemStatus::BlockedForHuman;
                item.qa_result = Some(qa);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QaReason, RequiredChange, Severity, Variant};

    fn rejection() -> QaResult {
        QaResult::rejected(
            vec![QaReason::new("CONTENT_MISMATCH", Severity::Critical, "wrong")],
            vec![
                RequiredChange::new(2, "secondary fix"),
                RequiredChange::new(1, "primary fix"),
            ],
            0.9,
        )
    }

    #[test]
    fn test_approval_decision() {
        let policy = RetryEscalationPolicy::default();
        let item = WorkItem::new("p", "a1", Variant::Forward);
        assert_eq!(
            policy.decide(&item, &QaResult::approved(0.95)),
            PolicyDecision::Approve
        );
    }

    #[test]
    fn test_retry_seeded_by_top_change() {
        let policy = RetryEscalationPolicy::new(3);
        let mut item = WorkItem::new("p", "a1", Variant::Forward);
        item.attempt_count = 1;

        let decision = policy.decide(&item, &rejection());
        assert_eq!(
            decision,
            PolicyDecision::Retry {
                next_attempt: 2,
                seed_change: Some("primary fix".to_string()),
            }
        );

        policy.apply(&mut item, rejection(), &decision);
        assert_eq!(item.status, WorkItemStatus::Rejected);
        assert_eq!(item.change_request.as_deref(), Some("primary fix"));
    }

    #[test]
    fn test_escalation_at_budget() {
        let policy = RetryEscalationPolicy::new(3);
        let mut item = WorkItem::new("p", "a1", Variant::Forward);
        // The failing attempt was the third and last.
        item.attempt_count = 3;

        let decision = policy.decide(&item, &rejection());
        assert_eq!(decision, PolicyDecision::Escalate);

        policy.apply(&mut item, rejection(), &decision);
        assert_eq!(item.status, WorkItemStatus::BlockedForHuman);
        assert!(item.qa_result.is_some());
    }

    #[test]
    fn test_penultimate_attempt_still_retries() {
        let policy = RetryEscalationPolicy::new(3);
        let mut item = WorkItem::new("p", "a1", Variant::Forward);
        item.attempt_count = 2;
        assert!(matches!(
            policy.decide(&item, &rejection()),
            PolicyDecision::Retry { next_attempt: 3, .. }
        ));
    }

    #[test]
    fn test_low_confidence_rejection_needs_review() {
        let policy = RetryEscalationPolicy::new(3);
        let mut item = WorkItem::new("p", "a1", Variant::Forward);
        item.attempt_count = 1;
        let qa = QaResult::rejected(
            vec![QaReason::new("X", Severity::Minor, "unsure")],
            vec![],
            0.3,
        );
        let decision = policy.decide(&item, &qa);
        policy.apply(&mut item, qa, &decision);
        assert_eq!(item.status, WorkItemStatus::NeedsReview);
    }
}
