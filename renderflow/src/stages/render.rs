//! Step 3: per-area directional renders, dispatched in waves with QA and
//! bounded retries.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{StageContext, StageHandler};
use crate::dispatch::backoff::Backoff;
use crate::dispatch::batch::{
    BatchDispatcher, BatchTally, ItemOutcome, ItemWorker, QueueEntry, WaveControl, WaveObserver,
};
use crate::errors::RenderflowError;
use crate::events::EventLogEntry;
use crate::model::{AreaSpec, AssetRef, RunState, StageOutput, Variant, WorkItem, WorkItemStatus};
use crate::phase::StageId;
use crate::ports::{BlobStorage, GenerationBackend, GenerationRequest};
use crate::qa::{PolicyDecision, QaValidator, RetryEscalationPolicy};
use crate::store::RunStore;
use crate::utils::now;

/// Renders every active area in both directional variants, judging each
/// attempt and retrying within the policy budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderStage;

#[async_trait]
impl StageHandler for RenderStage {
    fn stage(&self) -> StageId {
        StageId::Render
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, RenderflowError> {
        let styled = match ctx.store.get_stage_output(&ctx.run.id, StageId::Stylize).await? {
            Some(StageOutput::Stylize { styled_ref }) => styled_ref,
            _ => {
                return Err(RenderflowError::MissingInput {
                    stage: StageId::Render,
                    what: "styled image output".to_string(),
                })
            }
        };
        let areas = match ctx.store.get_stage_output(&ctx.run.id, StageId::Detect).await? {
            Some(StageOutput::Detect { areas }) => areas,
            _ => {
                return Err(RenderflowError::MissingInput {
                    stage: StageId::Render,
                    what: "detected areas output".to_string(),
                })
            }
        };

        let items = self.ensure_items(ctx, &areas).await?;

        // Terminal items (approved earlier, or already blocked) are
        // excluded from dispatch; a re-entered stage only works on what
        // is left.
        let seeds: Vec<QueueEntry> = items
            .iter()
            .filter(|item| item.status.is_retryable())
            .map(|item| QueueEntry::immediate(item.id.clone(), item.attempt_count + 1))
            .collect();

        let worker = RenderWorker {
            store: ctx.store.clone(),
            backend: ctx.backend.clone(),
            storage: ctx.storage.clone(),
            validator: ctx.validator.clone(),
            policy: ctx.policy,
            backoff: ctx.config.backoff(),
            pipeline_id: ctx.run.id.clone(),
            styled,
            areas: areas
                .iter()
                .filter(|a| a.active)
                .map(|a| (a.id.clone(), a.clone()))
                .collect(),
            max_attempts: ctx.config.max_attempts,
        };
        let observer = RenderWaveObserver {
            store: ctx.store.clone(),
            pipeline_id: ctx.run.id.clone(),
            job_token: ctx.job_token.clone(),
            total: seeds.len(),
        };

        let dispatcher = BatchDispatcher::new(
            ctx.config.wave_size,
            ctx.config.wave_pause(),
            ctx.config.backoff(),
        );
        let tally = dispatcher.run(seeds, &worker, &observer).await;

        if tally.stopped {
            return Err(RenderflowError::Paused {
                pipeline_id: ctx.run.id.clone(),
            });
        }

        let items = ctx.store.list_items(&ctx.run.id).await?;
        let approved = items.iter().filter(|i| i.is_gate_approved()).count();
        let blocked = items
            .iter()
            .filter(|i| i.status == WorkItemStatus::BlockedForHuman && !i.locked_approved)
            .count();

        tracing::info!(
            pipeline_id = %ctx.run.id,
            approved,
            blocked,
            retried = tally.retried,
            waves = tally.waves,
            "render batch drained"
        );
        Ok(StageOutput::Render { approved, blocked })
    }
}

impl RenderStage {
    /// Creates missing work items so every active area has both
    /// variants. Existing items survive re-entry untouched.
    async fn ensure_items(
        &self,
        ctx: &StageContext,
        areas: &[AreaSpec],
    ) -> Result<Vec<WorkItem>, RenderflowError> {
        let existing = ctx.store.list_items(&ctx.run.id).await?;
        let have: HashSet<(String, Variant)> = existing
            .iter()
            .map(|item| (item.area_id.clone(), item.variant))
            .collect();

        let mut fresh = Vec::new();
        for area in areas.iter().filter(|a| a.active) {
            for variant in Variant::ALL {
                if !have.contains(&(area.id.clone(), variant)) {
                    fresh.push(WorkItem::new(&ctx.run.id, &area.id, variant));
                }
            }
        }
        if !fresh.is_empty() {
            ctx.store.insert_items(fresh).await?;
        }
        ctx.store.list_items(&ctx.run.id).await
    }
}

/// Processes one render attempt: generate, store, judge, decide.
struct RenderWorker {
    store: Arc<dyn RunStore>,
    backend: Arc<dyn GenerationBackend>,
    storage: Arc<dyn BlobStorage>,
    validator: Arc<dyn QaValidator>,
    policy: RetryEscalationPolicy,
    backoff: Backoff,
    pipeline_id: String,
    styled: AssetRef,
    areas: HashMap<String, AreaSpec>,
    max_attempts: u32,
}

impl RenderWorker {
    async fn run_attempt(
        &self,
        item_id: &str,
        attempt: u32,
    ) -> Result<ItemOutcome, RenderflowError> {
        let mut item = self.store.get_item(&self.pipeline_id, item_id).await?;
        item.status = WorkItemStatus::Processing;
        item.attempt_count = attempt;
        item.updated_at = now();
        self.store.update_item(item.clone()).await?;

        let area = self.areas.get(&item.area_id).cloned().ok_or_else(|| {
            RenderflowError::MissingInput {
                stage: StageId::Render,
                what: format!("area '{}' for item '{}'", item.area_id, item.id),
            }
        })?;

        let mut request =
            GenerationRequest::new(&self.pipeline_id, StageId::Render, vec![self.styled.clone()])
                .for_area(area.clone(), item.variant);
        if let Some(change) = &item.change_request {
            request = request.with_instruction(change.clone());
        }

        let content = self.backend.generate(&request).await?;
        let path = format!("{}/{}/{}.png", self.pipeline_id, item.area_id, item.variant);
        let asset_ref = self.storage.store("renders", &path, content.bytes).await?;
        item.asset_ref = Some(asset_ref);

        let qa = self.validator.validate(&area, &content.descriptor).await?;
        let decision = self.policy.decide(&item, &qa);
        self.policy.apply(&mut item, qa, &decision);
        self.store.update_item(item.clone()).await?;

        match decision {
            PolicyDecision::Approve => Ok(ItemOutcome::Approved),
            PolicyDecision::Retry { next_attempt, .. } => {
                let delay = self.backoff.delay_for(next_attempt.saturating_sub(1));
                self.emit(EventLogEntry::item_retry(
                    StageId::Render,
                    &item.id,
                    next_attempt,
                    delay.as_millis() as u64,
                ))
                .await;
                Ok(ItemOutcome::Retry { next_attempt })
            }
            PolicyDecision::Escalate => {
                self.emit(EventLogEntry::item_blocked(StageId::Render, &item.id))
                    .await;
                Ok(ItemOutcome::Blocked)
            }
        }
    }

    /// Upstream or storage failures stay isolated to the item: retry
    /// within the same attempt budget, escalate once it is spent.
    async fn handle_failure(&self, item_id: &str, attempt: u32, err: &RenderflowError) -> ItemOutcome {
        tracing::warn!(
            item_id,
            attempt,
            error = %err,
            code = err.code(),
            "render attempt failed"
        );
        let Ok(mut item) = self.store.get_item(&self.pipeline_id, item_id).await else {
            return ItemOutcome::Failed;
        };

        if attempt < self.max_attempts {
            item.status = WorkItemStatus::Pending;
            item.updated_at = now();
            if self.store.update_item(item).await.is_err() {
                return ItemOutcome::Failed;
            }
            let next_attempt = attempt + 1;
            let delay = self.backoff.delay_for(attempt);
            self.emit(EventLogEntry::item_retry(
                StageId::Render,
                item_id,
                next_attempt,
                delay.as_millis() as u64,
            ))
            .await;
            ItemOutcome::Retry { next_attempt }
        } else {
            item.status = WorkItemStatus::BlockedForHuman;
            item.updated_at = now();
            if self.store.update_item(item).await.is_err() {
                return ItemOutcome::Failed;
            }
            self.emit(EventLogEntry::item_blocked(StageId::Render, item_id))
                .await;
            ItemOutcome::Blocked
        }
    }

    async fn emit(&self, entry: EventLogEntry) {
        if let Err(err) = self.store.append_event(&self.pipeline_id, entry).await {
            tracing::warn!(error = %err, "event append failed");
        }
    }
}

#[async_trait]
impl ItemWorker for RenderWorker {
    async fn process(&self, item_id: &str, attempt: u32) -> ItemOutcome {
        match self.run_attempt(item_id, attempt).await {
            Ok(outcome) => outcome,
            Err(err) => self.handle_failure(item_id, attempt, &err).await,
        }
    }
}

/// Keeps the lease observably fresh and honours cooperative pause at
/// wave boundaries.
struct RenderWaveObserver {
    store: Arc<dyn RunStore>,
    pipeline_id: String,
    job_token: String,
    total: usize,
}

#[async_trait]
impl WaveObserver for RenderWaveObserver {
    async fn on_wave_complete(&self, _wave: usize, tally: &BatchTally) -> WaveControl {
        // Losing the lease means another worker reclaimed the stage.
        if self
            .store
            .heartbeat(&self.pipeline_id, &self.job_token)
            .await
            .is_err()
        {
            tracing::warn!(pipeline_id = %self.pipeline_id, "lease lost, stopping dispatch");
            return WaveControl::Stop;
        }

        let settled = tally.completed + tally.failed + tally.blocked;
        let progress = if self.total == 0 {
            1.0
        } else {
            settled as f64 / self.total as f64
        };
        if let Err(err) = self
            .store
            .append_event(
                &self.pipeline_id,
                EventLogEntry::heartbeat(StageId::Render, progress),
            )
            .await
        {
            tracing::warn!(error = %err, "heartbeat event append failed");
        }

        match self.store.get_run(&self.pipeline_id).await {
            Ok(run) if run.run_state == RunState::Paused => WaveControl::Stop,
            Ok(_) => WaveControl::Continue,
            Err(_) => WaveControl::Stop,
        }
    }
}
