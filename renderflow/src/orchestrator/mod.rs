//! The public orchestration surface.
//!
//! Every operation authenticates the caller through the identity
//! verifier and checks ownership against the run before touching it.
//! Stage execution itself goes through [`StageRunner`]; this module adds
//! the pipeline lifecycle (create, pause, resume, abort, reset), manual
//! approvals, and read-only status views.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::dispatch::{StageReport, StageRunner};
use crate::errors::RenderflowError;
use crate::events::EventLogEntry;
use crate::model::{AssetRef, PipelineRun, RunState, StageOutput, WorkItem, WorkItemStatus};
use crate::phase::{Phase, PhaseContract, StageId};
use crate::ports::{BlobStorage, GenerationBackend, IdentityVerifier};
use crate::qa::{QaValidator, RuleQaValidator};
use crate::stages::{default_handlers, StageHandler};
use crate::store::RunStore;
use crate::utils::Timestamp;


/// Read-only snapshot of a run for status polling.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    /// The run identifier.
    pub pipeline_id: String,
    /// Current phase.
    pub phase: Phase,
    /// Current step; always the phase's step.
    pub current_step: u32,
    /// Run-level state.
    pub run_state: RunState,
    /// Per-stage attempt counters.
    pub stage_attempts: HashMap<StageId, u32>,
    /// Last pipeline-level error, if any.
    pub last_error: Option<String>,
    /// Total work items.
    pub items_total: usize,
    /// Items terminally approved (QA or manual).
    pub items_approved: usize,
    /// Items blocked for human review.
    pub items_blocked: usize,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

/// The orchestration engine's front door.
pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    backend: Arc<dyn GenerationBackend>,
    storage: Arc<dyn BlobStorage>,
    verifier: Arc<dyn IdentityVerifier>,
    validator: Arc<dyn QaValidator>,
    config: OrchestratorConfig,
    handlers: Vec<Arc<dyn StageHandler>>,
}

impl Orchestrator {
    /// Creates an orchestrator with the default config, rule-based QA,
    /// and the standard handler set.
    #[must_use]
    pub fn new(
        store: Arc<dyn RunStore>,
        backend: Arc<dyn GenerationBackend>,
        storage: Arc<dyn BlobStorage>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            store,
            backend,
            storage,
            verifier,
            validator: Arc::new(RuleQaValidator::new()),
            config: OrchestratorConfig::default(),
            handlers: default_handlers(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the QA validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn QaValidator>) -> Self {
        self.validator = validator;
        self
    }

    fn runner(&self) -> StageRunner {
        StageRunner::new(
            self.store.clone(),
            self.backend.clone(),
            self.storage.clone(),
            self.validator.clone(),
            self.config.clone(),
        )
    }

    /// Resolves the caller and checks ownership of the run.
    async fn authorize(
        &self,
        bearer: &str,
        pipeline_id: &str,
    ) -> Result<PipelineRun, RenderflowError> {
        let owner = self.verifier.resolve(bearer).await?;
        let run = self.store.get_run(pipeline_id).await?;
        if run.owner != owner {
            return Err(RenderflowError::Unauthorized {
                owner,
                pipeline_id: pipeline_id.to_string(),
            });
        }
        Ok(run)
    }

    /// Creates a pipeline run for the caller's source asset.
    pub async fn create_pipeline(
        &self,
        bearer: &str,
        source_ref: AssetRef,
    ) -> Result<PipelineRun, RenderflowError> {
        let owner = self.verifier.resolve(bearer).await?;
        let run = PipelineRun::new(owner, source_ref);
        self.store.insert_run(run.clone()).await?;
        tracing::info!(pipeline_id = %run.id, owner = %run.owner, "pipeline created");
        Ok(run)
    }

    /// Dispatches the stage at the given step.
    ///
    /// Safe to call repeatedly: a completed stage returns its stored
    /// output, a running stage fails with the latest activity timestamp,
    /// a stale one is reclaimed.
    pub async fn start_stage(
        &self,
        bearer: &str,
        pipeline_id: &str,
        step: u32,
    ) -> Result<StageReport, RenderflowError> {
        let run = self.authorize(bearer, pipeline_id).await?;
        let stage = StageId::from_step(step).ok_or(RenderflowError::ContractViolation {
            phase: run.phase,
            step,
            expected_step: run.phase.step(),
        })?;
        let handler = self
            .handlers
            .iter()
            .find(|h| h.stage() == stage)
            .ok_or_else(|| RenderflowError::MissingInput {
                stage,
                what: "a registered stage handler".to_string(),
            })?
            .clone();
        self.runner().dispatch(pipeline_id, handler.as_ref()).await
    }

    /// Commits a human decision for the stage at the given step,
    /// advancing the pipeline exactly one step without executing it.
    ///
    /// Stages whose output is a single asset accept a replacement
    /// reference; detection and the render batch have structured outputs
    /// a single reference cannot express. Without a reference the phase
    /// advances and any stored output is kept as-is.
    pub async fn approve_stage(
        &self,
        bearer: &str,
        pipeline_id: &str,
        step: u32,
        output_ref: Option<AssetRef>,
    ) -> Result<PipelineRun, RenderflowError> {
        let run = self.authorize(bearer, pipeline_id).await?;
        match run.run_state {
            RunState::Aborted => {
                return Err(RenderflowError::Aborted {
                    pipeline_id: pipeline_id.to_string(),
                })
            }
            RunState::Paused => {
                return Err(RenderflowError::Paused {
                    pipeline_id: pipeline_id.to_string(),
                })
            }
            RunState::Active => {}
        }
        let stage = StageId::from_step(step).ok_or(RenderflowError::ContractViolation {
            phase: run.phase,
            step,
            expected_step: run.phase.step(),
        })?;
        PhaseContract::validate_entry(stage, run.phase)?;

        let output = match (stage, output_ref) {
            (StageId::Stylize, Some(asset)) => Some(StageOutput::Stylize { styled_ref: asset }),
            (StageId::Merge, Some(asset)) => Some(StageOutput::Merge {
                panoramas: vec![asset],
            }),
            (StageId::Composite, Some(asset)) => Some(StageOutput::Composite {
                composite_ref: asset,
            }),
            (StageId::Detect | StageId::Render, Some(_)) => {
                return Err(RenderflowError::MissingInput {
                    stage,
                    what: "a structured output; a single asset cannot stand in for it"
                        .to_string(),
                })
            }
            (_, None) => None,
        };

        let detail = match &output {
            Some(_) => format!("stage '{stage}' output supplied"),
            None => format!("stage '{stage}' approved without output"),
        };
        match output {
            // No lease exists at an entry phase, so the token here never
            // collides with a live worker's.
            Some(output) => {
                self.store
                    .complete_stage(pipeline_id, stage, "job:manual", output)
                    .await?;
            }
            None => {
                self.store
                    .commit_transition(pipeline_id, stage.success_phase())
                    .await?;
            }
        }
        self.store
            .append_event(pipeline_id, EventLogEntry::manual_approval(step, &detail))
            .await?;
        tracing::info!(pipeline_id, stage = %stage, "stage manually approved");
        self.store.get_run(pipeline_id).await
    }

    /// Manually approves a work item, bypassing QA, optionally replacing
    /// its asset.
    ///
    /// The override is audited and terminal: once locked, no automatic
    /// retry touches the item again. Approving an already-approved item
    /// is benign.
    pub async fn approve_item(
        &self,
        bearer: &str,
        pipeline_id: &str,
        item_id: &str,
        replacement: Option<AssetRef>,
    ) -> Result<WorkItem, RenderflowError> {
        self.authorize(bearer, pipeline_id).await?;
        let mut item = self.store.get_item(pipeline_id, item_id).await?;
        if item.is_gate_approved() && replacement.is_none() {
            return Ok(item);
        }
        item.approve_manually();
        if let Some(asset) = replacement {
            item.asset_ref = Some(asset);
        }
        self.store.update_item(item.clone()).await?;
        self.store
            .append_event(
                pipeline_id,
                EventLogEntry::manual_approval(
                    StageId::Render.step(),
                    &format!("item '{item_id}' locked approved"),
                ),
            )
            .await?;
        tracing::info!(pipeline_id, item_id, "work item manually approved");
        Ok(item)
    }

    /// Pauses the run. Honoured at stage entry and at wave boundaries of
    /// an in-flight render batch. Idempotent.
    pub async fn pause(&self, bearer: &str, pipeline_id: &str) -> Result<(), RenderflowError> {
        let run = self.authorize(bearer, pipeline_id).await?;
        match run.run_state {
            RunState::Aborted => Err(RenderflowError::Aborted {
                pipeline_id: pipeline_id.to_string(),
            }),
            RunState::Paused => Ok(()),
            RunState::Active => {
                self.store.set_run_state(pipeline_id, RunState::Paused).await?;
                self.store
                    .append_event(pipeline_id, EventLogEntry::paused(run.current_step))
                    .await?;
                tracing::info!(pipeline_id, "pipeline paused");
                Ok(())
            }
        }
    }

    /// Resumes a paused run. Idempotent.
    pub async fn resume(&self, bearer: &str, pipeline_id: &str) -> Result<(), RenderflowError> {
        let run = self.authorize(bearer, pipeline_id).await?;
        match run.run_state {
            RunState::Aborted => Err(RenderflowError::Aborted {
                pipeline_id: pipeline_id.to_string(),
            }),
            RunState::Active => Ok(()),
            RunState::Paused => {
                self.store.set_run_state(pipeline_id, RunState::Active).await?;
                self.store
                    .append_event(pipeline_id, EventLogEntry::resumed(run.current_step))
                    .await?;
                tracing::info!(pipeline_id, "pipeline resumed");
                Ok(())
            }
        }
    }

    /// Aborts the run. Terminal for automation; only a reset revives it.
    pub async fn abort(&self, bearer: &str, pipeline_id: &str) -> Result<(), RenderflowError> {
        let run = self.authorize(bearer, pipeline_id).await?;
        if run.run_state != RunState::Aborted {
            self.store.set_run_state(pipeline_id, RunState::Aborted).await?;
            tracing::warn!(pipeline_id, "pipeline aborted");
        }
        Ok(())
    }

    /// Resets the run to the start of the pipeline.
    ///
    /// Drops all stage outputs and work items, keeps the source asset and
    /// the event log, and records why.
    pub async fn reset_pipeline(
        &self,
        bearer: &str,
        pipeline_id: &str,
        reason: &str,
    ) -> Result<PipelineRun, RenderflowError> {
        self.authorize(bearer, pipeline_id).await?;
        self.store.reset_run(pipeline_id).await?;
        self.store
            .append_event(pipeline_id, EventLogEntry::reset(reason))
            .await?;
        tracing::info!(pipeline_id, reason, "pipeline reset");
        self.store.get_run(pipeline_id).await
    }

    /// Returns a status snapshot for polling.
    pub async fn run_status(
        &self,
        bearer: &str,
        pipeline_id: &str,
    ) -> Result<RunStatus, RenderflowError> {
        let run = self.authorize(bearer, pipeline_id).await?;
        let items = self.store.list_items(pipeline_id).await?;
        Ok(RunStatus {
            pipeline_id: run.id,
            phase: run.phase,
            current_step: run.current_step,
            run_state: run.run_state,
            stage_attempts: run.stage_attempts,
            last_error: run.last_error,
            items_total: items.len(),
            items_approved: items.iter().filter(|i| i.is_gate_approved()).count(),
            items_blocked: items
                .iter()
                .filter(|i| i.status == WorkItemStatus::BlockedForHuman)
                .count(),
            updated_at: run.updated_at,
        })
    }

    /// Returns the full event log.
    pub async fn events(
        &self,
        bearer: &str,
        pipeline_id: &str,
    ) -> Result<Vec<EventLogEntry>, RenderflowError> {
        self.authorize(bearer, pipeline_id).await?;
        self.store.events(pipeline_id).await
    }

    /// Returns all work items of the run.
    pub async fn list_items(
        &self,
        bearer: &str,
        pipeline_id: &str,
    ) -> Result<Vec<WorkItem>, RenderflowError> {
        self.authorize(bearer, pipeline_id).await?;
        self.store.list_items(pipeline_id).await
    }
}
