//! Per-stage controllers.
//!
//! A handler implements only its stage's actual work; the dispatch
//! protocol around it (phase validation, idempotency, leasing, commit)
//! lives in [`crate::dispatch::runner`].

pub mod composite;
pub mod detect;
pub mod merge;
pub mod render;
pub mod stylize;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::errors::RenderflowError;
use crate::model::{PipelineRun, StageOutput};
use crate::phase::StageId;
use crate::ports::{BlobStorage, GenerationBackend};
use crate::qa::{QaValidator, RetryEscalationPolicy};
use crate::store::RunStore;

pub use composite::CompositeStage;
pub use detect::DetectStage;
pub use merge::MergeStage;
pub use render::RenderStage;
pub use stylize::StylizeStage;

/// Everything a stage execution needs, assembled by the runner after the
/// lease is held.
pub struct StageContext {
    /// Snapshot of the run at lease acquisition.
    pub run: PipelineRun,
    /// The persisted store, the single source of truth.
    pub store: Arc<dyn RunStore>,
    /// The generation collaborator.
    pub backend: Arc<dyn GenerationBackend>,
    /// The blob storage collaborator.
    pub storage: Arc<dyn BlobStorage>,
    /// The QA validator.
    pub validator: Arc<dyn QaValidator>,
    /// The bounded-retry policy.
    pub policy: RetryEscalationPolicy,
    /// Dispatch configuration.
    pub config: OrchestratorConfig,
    /// The lease token held for this execution.
    pub job_token: String,
}

/// One pipeline stage's controller.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// The stage this handler implements.
    fn stage(&self) -> StageId;

    /// Executes the stage's work. The lease is already held; returning
    /// `Ok` commits the output and advances the phase, returning `Err`
    /// reverts to the stage's retryable phase (or review, for gate
    /// failures).
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, RenderflowError>;
}

/// Builds the full handler set, one per stage in step order.
#[must_use]
pub fn default_handlers() -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(StylizeStage),
        Arc::new(DetectStage),
        Arc::new(RenderStage),
        Arc::new(MergeStage),
        Arc::new(CompositeStage),
    ]
}
