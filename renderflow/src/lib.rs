//! # Renderflow
//!
//! An orchestration and QA-retry engine for multi-stage asset-generation
//! pipelines: source image → styled image → detected sub-areas →
//! per-area directional renders → panoramic merges → final composite.
//!
//! The engine provides:
//!
//! - **A persisted phase state machine**: every run sits at exactly one
//!   phase, bound 1:1 to a step integer, committed atomically
//! - **Idempotent stage dispatch**: duplicate calls return stored
//!   outputs, stale leases are reclaimed, failures revert to retryable
//!   phases
//! - **Gate checks**: the merge stage refuses entry until every active
//!   area's renders are terminally approved
//! - **Wave-based batch processing**: bounded concurrency with
//!   exponential backoff and per-item failure isolation
//! - **Bounded retry with human escalation**: QA rejections retry within
//!   a budget, then block for audited manual approval
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use renderflow::prelude::*;
//!
//! let engine = Orchestrator::new(store, backend, storage, verifier);
//! let run = engine.create_pipeline(token, source).await?;
//! for step in 1..=5 {
//!     engine.start_stage(token, &run.id, step).await?;
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod gate;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod phase;
pub mod ports;
pub mod qa;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::OrchestratorConfig;
    pub use crate::dispatch::{
        Backoff, BatchDispatcher, BatchTally, ItemOutcome, ItemWorker, JitterMode,
        QueueEntry, StageReport, StageRunner, WaveControl, WaveObserver,
    };
    pub use crate::errors::RenderflowError;
    pub use crate::events::EventLogEntry;
    pub use crate::gate::{GateCheck, GateChecker};
    pub use crate::model::{
        AreaSpec, AssetRef, PipelineRun, QaReason, QaResult, QaStatus, RenderDescriptor,
        RequiredChange, RunState, Severity, StageOutput, Variant, WorkItem, WorkItemStatus,
    };
    pub use crate::orchestrator::{Orchestrator, RunStatus};
    pub use crate::phase::{Phase, PhaseContract, StageId};
    pub use crate::ports::{
        BlobStorage, GeneratedContent, GenerationBackend, GenerationRequest, IdentityVerifier,
    };
    pub use crate::qa::{PolicyDecision, QaValidator, RetryEscalationPolicy, RuleQaValidator};
    pub use crate::stages::{default_handlers, StageContext, StageHandler};
    pub use crate::store::{InMemoryRunStore, RunStore};
}
