//! Persisted run store.
//!
//! The store is the single source of truth and the lock: there is no
//! in-process shared mutable state, and every multi-field transition is
//! atomic inside one store operation. `commit_transition` and the lease
//! operations are the only writers of (phase, step) — phase is never
//! persisted alone.

pub mod memory;

use async_trait::async_trait;

use crate::errors::RenderflowError;
use crate::events::EventLogEntry;
use crate::model::{PipelineRun, RunState, StageOutput, WorkItem};
use crate::phase::{Phase, StageId};

pub use memory::InMemoryRunStore;

/// Storage backend for pipeline runs, work items, and the event log.
///
/// All coordination between workers flows through this trait; any
/// implementation must make each method atomic with respect to the run
/// it touches.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts a new run.
    async fn insert_run(&self, run: PipelineRun) -> Result<(), RenderflowError>;

    /// Loads a run by id.
    async fn get_run(&self, pipeline_id: &str) -> Result<PipelineRun, RenderflowError>;

    /// Writes phase and step together. The sole mutator of either field
    /// outside the lease operations; step is always derived from the
    /// phase so a partial write cannot exist.
    async fn commit_transition(
        &self,
        pipeline_id: &str,
        phase: Phase,
    ) -> Result<(), RenderflowError>;

    /// Acquires the stage lease: atomically checks the entry phase, then
    /// writes the running phase, job token, and heartbeat together.
    ///
    /// With `reclaim` set, a run already sitting at the stage's running
    /// phase is taken over (stale-lock recovery); otherwise that case
    /// fails with [`RenderflowError::AlreadyRunning`].
    async fn acquire_lease(
        &self,
        pipeline_id: &str,
        stage: StageId,
        token: &str,
        reclaim: bool,
    ) -> Result<PipelineRun, RenderflowError>;

    /// Completes a stage: clears the lease, stores the output, and commits
    /// the success phase, all in one step. Overwriting an existing output
    /// is permitted; duplicate completion after lease reclaim is benign.
    ///
    /// When a *different* token currently holds the lease the write is
    /// dropped: a superseded worker's late commit must not clobber the
    /// live one. With no lease held the commit proceeds, which covers
    /// manual approvals and the benign-duplicate case.
    async fn complete_stage(
        &self,
        pipeline_id: &str,
        stage: StageId,
        token: &str,
        output: StageOutput,
    ) -> Result<(), RenderflowError>;

    /// Fails a stage: records `last_error`, clears the lease, and reverts
    /// to the given retryable phase instead of leaving it running.
    ///
    /// Same token rule as [`RunStore::complete_stage`]: a failure report
    /// from a worker whose lease was reclaimed is a no-op.
    async fn fail_stage(
        &self,
        pipeline_id: &str,
        revert_to: Phase,
        token: &str,
        error: &str,
    ) -> Result<(), RenderflowError>;

    /// Refreshes the lease heartbeat. A stale token is rejected so a
    /// reclaimed worker cannot keep an abandoned lease alive.
    async fn heartbeat(&self, pipeline_id: &str, token: &str) -> Result<(), RenderflowError>;

    /// Reads a stage output, validating that the stored payload's tag
    /// matches the stage it was stored under.
    async fn get_stage_output(
        &self,
        pipeline_id: &str,
        stage: StageId,
    ) -> Result<Option<StageOutput>, RenderflowError>;

    /// Increments and returns the stage-level attempt counter.
    async fn increment_stage_attempt(
        &self,
        pipeline_id: &str,
        stage: StageId,
    ) -> Result<u32, RenderflowError>;

    /// Sets the run-level state (pause/resume/abort), stamping
    /// `paused_at` as appropriate.
    async fn set_run_state(
        &self,
        pipeline_id: &str,
        state: RunState,
    ) -> Result<(), RenderflowError>;

    /// Deletes all derived work items and stage outputs and restores the
    /// initial phase/step. The source reference is preserved.
    async fn reset_run(&self, pipeline_id: &str) -> Result<(), RenderflowError>;

    /// Inserts work items for a pipeline.
    async fn insert_items(&self, items: Vec<WorkItem>) -> Result<(), RenderflowError>;

    /// Loads one work item.
    async fn get_item(
        &self,
        pipeline_id: &str,
        item_id: &str,
    ) -> Result<WorkItem, RenderflowError>;

    /// Replaces a work item record.
    async fn update_item(&self, item: WorkItem) -> Result<(), RenderflowError>;

    /// Lists all work items of a pipeline.
    async fn list_items(&self, pipeline_id: &str) -> Result<Vec<WorkItem>, RenderflowError>;

    /// Appends an event log entry. Entries are never mutated.
    async fn append_event(
        &self,
        pipeline_id: &str,
        entry: EventLogEntry,
    ) -> Result<(), RenderflowError>;

    /// Returns the full ordered event log.
    async fn events(&self, pipeline_id: &str) -> Result<Vec<EventLogEntry>, RenderflowError>;

    /// Returns the latest event, the staleness signal for lease recovery.
    async fn latest_event(
        &self,
        pipeline_id: &str,
    ) -> Result<Option<EventLogEntry>, RenderflowError>;
}
