//! Gate checks: pure preconditions over a work item set.
//!
//! A gate never mutates anything; it reports whether a stage may begin
//! consuming a batch, and how many items stand in the way if not.

use std::collections::HashSet;

use crate::model::{AreaSpec, Variant, WorkItem};

/// Result of evaluating a gate. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateCheck {
    /// True if every required item is terminally approved.
    pub passed: bool,
    /// Number of incomplete items blocking the transition.
    pub blocking: usize,
    /// The (area, variant) pairs that are not yet approved.
    pub missing: Vec<(String, Variant)>,
}

impl GateCheck {
    fn passed() -> Self {
        Self {
            passed: true,
            blocking: 0,
            missing: Vec::new(),
        }
    }
}

/// Evaluates gates between stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateChecker;

impl GateChecker {
    /// Checks that every active area has every required variant in a
    /// terminal-approved state (QA-approved or manually locked).
    ///
    /// Areas with no work items at all count as blocking for each missing
    /// variant, so a gate can never pass by omission.
    #[must_use]
    pub fn check_all_approved(areas: &[AreaSpec], items: &[WorkItem]) -> GateCheck {
        let approved: HashSet<(&str, Variant)> = items
            .iter()
            .filter(|item| item.is_gate_approved())
            .map(|item| (item.area_id.as_str(), item.variant))
            .collect();

        let mut missing = Vec::new();
        for area in areas.iter().filter(|a| a.active) {
            for variant in Variant::ALL {
                if !approved.contains(&(area.id.as_str(), variant)) {
                    missing.push((area.id.clone(), variant));
                }
            }
        }

        if missing.is_empty() {
            GateCheck::passed()
        } else {
            GateCheck {
                passed: false,
                blocking: missing.len(),
                missing,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QaResult, WorkItemStatus};

    fn approved_item(pipeline: &str, area: &str, variant: Variant) -> WorkItem {
        let mut item = WorkItem::new(pipeline, area, variant);
        item.approve(QaResult::approved(0.9));
        item
    }

    #[test]
    fn test_gate_passes_when_all_approved() {
        let areas = vec![AreaSpec::new("a1", "kitchen"), AreaSpec::new("a2", "bedroom")];
        let items = vec![
            approved_item("p", "a1", Variant::Forward),
            approved_item("p", "a1", Variant::Reverse),
            approved_item("p", "a2", Variant::Forward),
            approved_item("p", "a2", Variant::Reverse),
        ];
        let check = GateChecker::check_all_approved(&areas, &items);
        assert!(check.passed);
        assert_eq!(check.blocking, 0);
    }

    #[test]
    fn test_gate_blocking_count_equals_incomplete_items() {
        let areas = vec![AreaSpec::new("a1", "kitchen"), AreaSpec::new("a2", "bedroom")];
        let mut rejected = WorkItem::new("p", "a2", Variant::Reverse);
        rejected.status = WorkItemStatus::Rejected;
        let items = vec![
            approved_item("p", "a1", Variant::Forward),
            approved_item("p", "a1", Variant::Reverse),
            approved_item("p", "a2", Variant::Forward),
            rejected,
        ];
        let check = GateChecker::check_all_approved(&areas, &items);
        assert!(!check.passed);
        assert_eq!(check.blocking, 1);
        assert_eq!(check.missing, vec![("a2".to_string(), Variant::Reverse)]);
    }

    #[test]
    fn test_gate_counts_absent_items() {
        let areas = vec![AreaSpec::new("a1", "kitchen")];
        let check = GateChecker::check_all_approved(&areas, &[]);
        assert!(!check.passed);
        assert_eq!(check.blocking, 2);
    }

    #[test]
    fn test_gate_ignores_inactive_areas() {
        let areas = vec![AreaSpec::new("a1", "kitchen"), AreaSpec::new("a2", "attic").inactive()];
        let items = vec![
            approved_item("p", "a1", Variant::Forward),
            approved_item("p", "a1", Variant::Reverse),
        ];
        let check = GateChecker::check_all_approved(&areas, &items);
        assert!(check.passed);
    }

    #[test]
    fn test_gate_accepts_locked_approval() {
        let areas = vec![AreaSpec::new("a1", "kitchen")];
        let mut blocked = WorkItem::new("p", "a1", Variant::Reverse);
        blocked.status = WorkItemStatus::BlockedForHuman;
        blocked.approve_manually();
        let items = vec![approved_item("p", "a1", Variant::Forward), blocked];
        let check = GateChecker::check_all_approved(&areas, &items);
        assert!(check.passed);
    }
}
