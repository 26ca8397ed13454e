//! In-memory run store.
//!
//! One mutex guards the whole table, so every trait method is atomic
//! across all the fields it touches. Suitable for tests and single-node
//! deployments; a database-backed implementation follows the same
//! contract.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::RunStore;
use crate::errors::RenderflowError;
use crate::events::EventLogEntry;
use crate::model::{PipelineRun, RunState, StageOutput, WorkItem};
use crate::phase::{Phase, PhaseContract, StageId};
use crate::utils::{iso_timestamp, now};

#[derive(Debug, Default)]
struct RunRecord {
    run: Option<PipelineRun>,
    items: HashMap<String, WorkItem>,
    events: Vec<EventLogEntry>,
}

/// In-memory [`RunStore`] implementation.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    records: Mutex<HashMap<String, RunRecord>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.records.lock().values().filter(|r| r.run.is_some()).count()
    }

    fn with_run<T>(
        &self,
        pipeline_id: &str,
        f: impl FnOnce(&mut PipelineRun) -> Result<T, RenderflowError>,
    ) -> Result<T, RenderflowError> {
        let mut records = self.records.lock();
        let run = records
            .get_mut(pipeline_id)
            .and_then(|r| r.run.as_mut())
            .ok_or_else(|| RenderflowError::PipelineNotFound {
                pipeline_id: pipeline_id.to_string(),
            })?;
        let result = f(run)?;
        run.updated_at = now();
        Ok(result)
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert_run(&self, run: PipelineRun) -> Result<(), RenderflowError> {
        let mut records = self.records.lock();
        let record = records.entry(run.id.clone()).or_default();
        if record.run.is_some() {
            return Err(RenderflowError::Storage(format!(
                "run '{}' already exists",
                run.id
            )));
        }
        record.run = Some(run);
        Ok(())
    }

    async fn get_run(&self, pipeline_id: &str) -> Result<PipelineRun, RenderflowError> {
        self.records
            .lock()
            .get(pipeline_id)
            .and_then(|r| r.run.clone())
            .ok_or_else(|| RenderflowError::PipelineNotFound {
                pipeline_id: pipeline_id.to_string(),
            })
    }

    async fn commit_transition(
        &self,
        pipeline_id: &str,
        phase: Phase,
    ) -> Result<(), RenderflowError> {
        self.with_run(pipeline_id, |run| {
            run.phase = phase;
            run.current_step = phase.step();
            Ok(())
        })
    }

    async fn acquire_lease(
        &self,
        pipeline_id: &str,
        stage: StageId,
        token: &str,
        reclaim: bool,
    ) -> Result<PipelineRun, RenderflowError> {
        self.with_run(pipeline_id, |run| {
            let running = stage.running_phase();
            if run.phase == running {
                if !reclaim {
                    return Err(RenderflowError::AlreadyRunning {
                        stage,
                        since: run
                            .heartbeat_at
                            .map_or_else(|| "unknown".to_string(), iso_timestamp),
                    });
                }
            } else {
                PhaseContract::validate_entry(stage, run.phase)?;
            }
            run.phase = running;
            run.current_step = running.step();
            run.job_token = Some(token.to_string());
            run.heartbeat_at = Some(now());
            run.last_error = None;
            Ok(run.clone())
        })
    }

    async fn complete_stage(
        &self,
        pipeline_id: &str,
        stage: StageId,
        token: &str,
        output: StageOutput,
    ) -> Result<(), RenderflowError> {
        self.with_run(pipeline_id, |run| {
            // A different live token means this worker was superseded; its
            // late commit is dropped so the current lease stays intact.
            if matches!(&run.job_token, Some(held) if held != token) {
                tracing::warn!(pipeline_id, stage = %stage, "stale completion dropped");
                return Ok(());
            }
            // Overwrite is deliberate: duplicate completion after a lease
            // reclaim must be benign.
            run.step_outputs.insert(stage, output);
            run.job_token = None;
            run.heartbeat_at = None;
            run.last_error = None;
            let next = stage.success_phase();
            run.phase = next;
            run.current_step = next.step();
            Ok(())
        })
    }

    async fn fail_stage(
        &self,
        pipeline_id: &str,
        revert_to: Phase,
        token: &str,
        error: &str,
    ) -> Result<(), RenderflowError> {
        self.with_run(pipeline_id, |run| {
            if matches!(&run.job_token, Some(held) if held != token) {
                tracing::warn!(pipeline_id, "stale failure report dropped");
                return Ok(());
            }
            run.last_error = Some(error.to_string());
            run.job_token = None;
            run.heartbeat_at = None;
            run.phase = revert_to;
            run.current_step = revert_to.step();
            Ok(())
        })
    }

    async fn heartbeat(&self, pipeline_id: &str, token: &str) -> Result<(), RenderflowError> {
        self.with_run(pipeline_id, |run| {
            if run.job_token.as_deref() != Some(token) {
                return Err(RenderflowError::Storage(format!(
                    "heartbeat rejected: token no longer holds the lease on '{pipeline_id}'"
                )));
            }
            run.heartbeat_at = Some(now());
            Ok(())
        })
    }

    async fn get_stage_output(
        &self,
        pipeline_id: &str,
        stage: StageId,
    ) -> Result<Option<StageOutput>, RenderflowError> {
        let run = self.get_run(pipeline_id).await?;
        match run.step_outputs.get(&stage) {
            None => Ok(None),
            Some(output) => {
                if output.stage() != stage {
                    return Err(RenderflowError::CorruptOutput {
                        stage,
                        found: output.stage().to_string(),
                    });
                }
                Ok(Some(output.clone()))
            }
        }
    }

    async fn increment_stage_attempt(
        &self,
        pipeline_id: &str,
        stage: StageId,
    ) -> Result<u32, RenderflowError> {
        self.with_run(pipeline_id, |run| {
            let counter = run.stage_attempts.entry(stage).or_insert(0);
            *counter += 1;
            Ok(*counter)
        })
    }

    async fn set_run_state(
        &self,
        pipeline_id: &str,
        state: RunState,
    ) -> Result<(), RenderflowError> {
        self.with_run(pipeline_id, |run| {
            run.run_state = state;
            run.paused_at = match state {
                RunState::Paused => Some(now()),
                RunState::Active | RunState::Aborted => None,
            };
            Ok(())
        })
    }

    async fn reset_run(&self, pipeline_id: &str) -> Result<(), RenderflowError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(pipeline_id)
            .ok_or_else(|| RenderflowError::PipelineNotFound {
                pipeline_id: pipeline_id.to_string(),
            })?;
        let run = record
            .run
            .as_mut()
            .ok_or_else(|| RenderflowError::PipelineNotFound {
                pipeline_id: pipeline_id.to_string(),
            })?;
        record.items.clear();
        run.step_outputs.clear();
        run.stage_attempts.clear();
        run.last_error = None;
        run.job_token = None;
        run.heartbeat_at = None;
        run.run_state = RunState::Active;
        run.paused_at = None;
        run.phase = Phase::StylizePending;
        run.current_step = Phase::StylizePending.step();
        run.updated_at = now();
        Ok(())
    }

    async fn insert_items(&self, items: Vec<WorkItem>) -> Result<(), RenderflowError> {
        let mut records = self.records.lock();
        for item in items {
            let record = records.get_mut(&item.pipeline_id).ok_or_else(|| {
                RenderflowError::PipelineNotFound {
                    pipeline_id: item.pipeline_id.clone(),
                }
            })?;
            record.items.insert(item.id.clone(), item);
        }
        Ok(())
    }

    async fn get_item(
        &self,
        pipeline_id: &str,
        item_id: &str,
    ) -> Result<WorkItem, RenderflowError> {
        self.records
            .lock()
            .get(pipeline_id)
            .and_then(|r| r.items.get(item_id).cloned())
            .ok_or_else(|| RenderflowError::ItemNotFound {
                item_id: item_id.to_string(),
            })
    }

    async fn update_item(&self, item: WorkItem) -> Result<(), RenderflowError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&item.pipeline_id).ok_or_else(|| {
            RenderflowError::PipelineNotFound {
                pipeline_id: item.pipeline_id.clone(),
            }
        })?;
        if !record.items.contains_key(&item.id) {
            return Err(RenderflowError::ItemNotFound {
                item_id: item.id.clone(),
            });
        }
        record.items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn list_items(&self, pipeline_id: &str) -> Result<Vec<WorkItem>, RenderflowError> {
        let records = self.records.lock();
        let record = records
            .get(pipeline_id)
            .ok_or_else(|| RenderflowError::PipelineNotFound {
                pipeline_id: pipeline_id.to_string(),
            })?;
        let mut items: Vec<WorkItem> = record.items.values().cloned().collect();
        items.sort_by(|a, b| (&a.area_id, a.variant as u8).cmp(&(&b.area_id, b.variant as u8)));
        Ok(items)
    }

    async fn append_event(
        &self,
        pipeline_id: &str,
        entry: EventLogEntry,
    ) -> Result<(), RenderflowError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(pipeline_id)
            .ok_or_else(|| RenderflowError::PipelineNotFound {
                pipeline_id: pipeline_id.to_string(),
            })?;
        record.events.push(entry);
        Ok(())
    }

    async fn events(&self, pipeline_id: &str) -> Result<Vec<EventLogEntry>, RenderflowError> {
        let records = self.records.lock();
        let record = records
            .get(pipeline_id)
            .ok_or_else(|| RenderflowError::PipelineNotFound {
                pipeline_id: pipeline_id.to_string(),
            })?;
        Ok(record.events.clone())
    }

    async fn latest_event(
        &self,
        pipeline_id: &str,
    ) -> Result<Option<EventLogEntry>, RenderflowError> {
        let records = self.records.lock();
        let record = records
            .get(pipeline_id)
            .ok_or_else(|| RenderflowError::PipelineNotFound {
                pipeline_id: pipeline_id.to_string(),
            })?;
        Ok(record.events.last().cloned())
    }
}
