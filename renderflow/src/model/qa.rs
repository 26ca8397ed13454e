//! Structured QA judgments.
//!
//! A `QaResult` is immutable once attached to an attempt; a new attempt
//! produces a new result.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The verdict of a QA judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaStatus {
    /// The attempt passed all checks.
    Approved,
    /// The attempt failed at least one check.
    Rejected,
}

/// Severity of a rejection reason, used for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic, would not block approval on its own.
    Minor,
    /// Significant deviation from the area expectations.
    Major,
    /// The render cannot be used at all.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One ranked rejection reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaReason {
    /// Stable reason code (e.g. "CONTENT_MISMATCH").
    pub code: String,
    /// How bad this reason is.
    pub severity: Severity,
    /// Human-readable description.
    pub description: String,
}

impl QaReason {
    /// Creates a new reason.
    #[must_use]
    pub fn new(
        code: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            severity,
            description: description.into(),
        }
    }
}

/// A concrete instruction for the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredChange {
    /// Lower values are applied first.
    pub priority: u32,
    /// The instruction text fed into the next generation attempt.
    pub instruction: String,
}

impl RequiredChange {
    /// Creates a new required change.
    #[must_use]
    pub fn new(priority: u32, instruction: impl Into<String>) -> Self {
        Self {
            priority,
            instruction: instruction.into(),
        }
    }
}

/// The full result of judging one generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaResult {
    /// Approved or rejected.
    pub status: QaStatus,
    /// Rejection reasons, ranked most severe first.
    #[serde(default)]
    pub reasons: Vec<QaReason>,
    /// Concrete instructions for the next attempt, priority-ordered.
    #[serde(default)]
    pub required_changes: Vec<RequiredChange>,
    /// Validator confidence in [0.0, 1.0].
    pub confidence: f64,
}

impl QaResult {
    /// Creates an approval with the given confidence.
    #[must_use]
    pub fn approved(confidence: f64) -> Self {
        Self {
            status: QaStatus::Approved,
            reasons: Vec::new(),
            required_changes: Vec::new(),
            confidence,
        }
    }

    /// Creates a rejection. Reasons are re-ranked most severe first and
    /// changes are sorted by ascending priority.
    #[must_use]
    pub fn rejected(
        mut reasons: Vec<QaReason>,
        mut required_changes: Vec<RequiredChange>,
        confidence: f64,
    ) -> Self {
        reasons.sort_by(|a, b| b.severity.cmp(&a.severity));
        required_changes.sort_by_key(|c| c.priority);
        Self {
            status: QaStatus::Rejected,
            reasons,
            required_changes,
            confidence,
        }
    }

    /// Returns true if the attempt passed.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.status == QaStatus::Approved
    }

    /// The top-ranked rejection reason, if any.
    #[must_use]
    pub fn top_reason(&self) -> Option<&QaReason> {
        self.reasons.first()
    }

    /// The top-priority required change, if any. Seeds the next attempt.
    #[must_use]
    pub fn top_change(&self) -> Option<&RequiredChange> {
        self.required_changes.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approved() {
        let result = QaResult::approved(0.95);
        assert!(result.is_approved());
        assert!(result.top_reason().is_none());
    }

    #[test]
    fn test_rejected_ranks_reasons_by_severity() {
        let result = QaResult::rejected(
            vec![
                QaReason::new("MINOR_THING", Severity::Minor, "minor"),
                QaReason::new("CONTENT_MISMATCH", Severity::Critical, "wrong content"),
                QaReason::new("MISSING_ADJACENT", Severity::Major, "missing"),
            ],
            vec![],
            0.8,
        );
        let codes: Vec<&str> = result.reasons.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["CONTENT_MISMATCH", "MISSING_ADJACENT", "MINOR_THING"]);
    }

    #[test]
    fn test_rejected_orders_changes_by_priority() {
        let result = QaResult::rejected(
            vec![QaReason::new("X", Severity::Major, "x")],
            vec![
                RequiredChange::new(2, "second"),
                RequiredChange::new(1, "first"),
            ],
            0.7,
        );
        assert_eq!(result.top_change().unwrap().instruction, "first");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Major);
        assert!(Severity::Major > Severity::Minor);
    }
}
