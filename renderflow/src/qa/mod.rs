//! Quality validation of generation attempts.
//!
//! A validator produces a structured pass/fail judgment with ranked
//! reasons and concrete required-change instructions. Validators never
//! mutate work items; the escalation policy in [`policy`] decides what
//! happens with the verdict.

pub mod policy;

use async_trait::async_trait;

use crate::errors::RenderflowError;
use crate::model::{
    AreaSpec, QaReason, QaResult, RenderDescriptor, RequiredChange, Severity,
};

pub use policy::{PolicyDecision, RetryEscalationPolicy};

/// Judges one generation attempt against the area's expectations.
#[async_trait]
pub trait QaValidator: Send + Sync {
    /// Validates a render descriptor for an area. Infallible judgments
    /// only; an inability to judge is an upstream failure, not a verdict.
    async fn validate(
        &self,
        area: &AreaSpec,
        descriptor: &RenderDescriptor,
    ) -> Result<QaResult, RenderflowError>;
}

/// Rule-based validator over the structured render descriptor.
///
/// Checks, in rank order: content-type match (critical), forbidden
/// element absence (major), required adjacency presence (major).
#[derive(Debug, Clone, Copy)]
pub struct RuleQaValidator {
    /// Confidence reported for clean approvals.
    approve_confidence: f64,
    /// Confidence reported for rejections.
    reject_confidence: f64,
}

impl Default for RuleQaValidator {
    fn default() -> Self {
        Self {
            approve_confidence: 0.95,
            reject_confidence: 0.9,
        }
    }
}

impl RuleQaValidator {
    /// Creates a validator with default confidences.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QaValidator for RuleQaValidator {
    async fn validate(
        &self,
        area: &AreaSpec,
        descriptor: &RenderDescriptor,
    ) -> Result<QaResult, RenderflowError> {
        let mut reasons = Vec::new();
        let mut changes = Vec::new();

        if descriptor.content_kind != area.content_kind {
            reasons.push(QaReason::new(
                "CONTENT_MISMATCH",
                Severity::Critical,
                format!(
                    "expected content kind '{}', got '{}'",
                    area.content_kind, descriptor.content_kind
                ),
            ));
            changes.push(RequiredChange::new(
                1,
                format!("regenerate as '{}' content", area.content_kind),
            ));
        }

        for forbidden in &area.forbidden {
            if descriptor.elements.contains(forbidden) {
                reasons.push(QaReason::new(
                    "FORBIDDEN_ELEMENT",
                    Severity::Major,
                    format!("forbidden element '{forbidden}' present"),
                ));
                changes.push(RequiredChange::new(
                    2,
                    format!("remove '{forbidden}' from the render"),
                ));
            }
        }

        for required in &area.required_adjacent {
            if !descriptor.adjacent.contains(required) {
                reasons.push(QaReason::new(
                    "MISSING_ADJACENT",
                    Severity::Major,
                    format!("required adjacent element '{required}' missing"),
                ));
                changes.push(RequiredChange::new(
                    3,
                    format!("include '{required}' adjacent to the {}", area.content_kind),
                ));
            }
        }

        if reasons.is_empty() {
            Ok(QaResult::approved(self.approve_confidence))
        } else {
            Ok(QaResult::rejected(reasons, changes, self.reject_confidence))
        }
    }
}
