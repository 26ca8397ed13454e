//! The idempotent stage dispatch protocol.
//!
//! Every stage invocation follows the same sequence: load the run, honour
//! pause/abort, short-circuit duplicates, recover stale leases, acquire
//! the lease, execute, then commit success or revert to a retryable
//! phase. Handlers never see a run they do not hold the lease for.

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::errors::RenderflowError;
use crate::events::EventLogEntry;
use crate::model::{RunState, StageOutput};
use crate::phase::{Phase, StageId};
use crate::ports::{BlobStorage, GenerationBackend};
use crate::qa::{QaValidator, RetryEscalationPolicy};
use crate::stages::{StageContext, StageHandler};
use crate::store::RunStore;
use crate::utils::{fingerprint, generate_job_token, iso_timestamp, now, seconds_between};

/// Outcome of one stage dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    /// The dispatched stage.
    pub stage: StageId,
    /// The committed (or previously committed) output.
    pub output: StageOutput,
    /// The run's phase after the dispatch.
    pub phase: Phase,
    /// True if the call was a duplicate and no work ran.
    pub idempotent: bool,
}

/// Drives stage handlers through the dispatch protocol.
///
/// The runner owns no state of its own; the store carries all
/// coordination, so any number of runner instances may race safely.
pub struct StageRunner {
    store: Arc<dyn RunStore>,
    backend: Arc<dyn GenerationBackend>,
    storage: Arc<dyn BlobStorage>,
    validator: Arc<dyn QaValidator>,
    config: OrchestratorConfig,
}

impl StageRunner {
    /// Creates a runner over the given store and collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RunStore>,
        backend: Arc<dyn GenerationBackend>,
        storage: Arc<dyn BlobStorage>,
        validator: Arc<dyn QaValidator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            backend,
            storage,
            validator,
            config,
        }
    }

    /// Dispatches one stage invocation.
    ///
    /// Duplicate calls for an already-completed stage return the stored
    /// output without re-executing. A lease whose latest activity is
    /// older than the staleness window is reclaimed; a fresh lease fails
    /// with [`RenderflowError::AlreadyRunning`].
    pub async fn dispatch(
        &self,
        pipeline_id: &str,
        handler: &dyn StageHandler,
    ) -> Result<StageReport, RenderflowError> {
        let stage = handler.stage();
        let run = self.store.get_run(pipeline_id).await?;

        match run.run_state {
            RunState::Paused => {
                return Err(RenderflowError::Paused {
                    pipeline_id: pipeline_id.to_string(),
                })
            }
            RunState::Aborted => {
                return Err(RenderflowError::Aborted {
                    pipeline_id: pipeline_id.to_string(),
                })
            }
            RunState::Active => {}
        }

        // Duplicate completion is benign: if the stage already committed
        // and the run moved past it, hand back the stored output before
        // any phase validation complains.
        if run.phase.step() > stage.step() {
            if let Some(output) = self.store.get_stage_output(pipeline_id, stage).await? {
                tracing::debug!(
                    pipeline_id,
                    stage = %stage,
                    "duplicate dispatch short-circuited"
                );
                return Ok(StageReport {
                    stage,
                    output,
                    phase: run.phase,
                    idempotent: true,
                });
            }
        }

        let reclaim = self.may_reclaim(pipeline_id, stage, &run.phase).await?;
        let token = generate_job_token();
        let run = self
            .store
            .acquire_lease(pipeline_id, stage, &token, reclaim)
            .await?;

        let attempt = self.store.increment_stage_attempt(pipeline_id, stage).await?;
        self.store
            .append_event(pipeline_id, EventLogEntry::stage_started(stage))
            .await?;
        tracing::info!(pipeline_id, stage = %stage, attempt, reclaim, "stage dispatched");

        let ctx = StageContext {
            run,
            store: self.store.clone(),
            backend: self.backend.clone(),
            storage: self.storage.clone(),
            validator: self.validator.clone(),
            policy: RetryEscalationPolicy::new(self.config.max_attempts),
            config: self.config.clone(),
            job_token: token.clone(),
        };

        match handler.execute(&ctx).await {
            Ok(output) => self.commit(pipeline_id, stage, &token, output).await,
            Err(err) => Err(self.revert(pipeline_id, stage, &token, err).await),
        }
    }

    /// Decides whether an existing lease may be taken over.
    ///
    /// Only a run sitting at this stage's running phase is in question;
    /// the latest event timestamp is the last sign of life.
    async fn may_reclaim(
        &self,
        pipeline_id: &str,
        stage: StageId,
        phase: &Phase,
    ) -> Result<bool, RenderflowError> {
        if *phase != stage.running_phase() {
            return Ok(false);
        }
        let since = match self.store.latest_event(pipeline_id).await? {
            Some(entry) => entry.timestamp,
            // No events at all: nothing proves the holder is alive.
            None => return Ok(true),
        };
        let idle_secs = seconds_between(since, now());
        if idle_secs >= self.config.staleness_secs {
            tracing::warn!(
                pipeline_id,
                stage = %stage,
                idle_secs,
                "stale lease detected, reclaiming"
            );
            return Ok(true);
        }
        Err(RenderflowError::AlreadyRunning {
            stage,
            since: iso_timestamp(since),
        })
    }

    async fn commit(
        &self,
        pipeline_id: &str,
        stage: StageId,
        token: &str,
        output: StageOutput,
    ) -> Result<StageReport, RenderflowError> {
        let payload = serde_json::to_vec(&output)?;
        self.store
            .complete_stage(pipeline_id, stage, token, output.clone())
            .await?;
        let mut completed = EventLogEntry::stage_completed(stage);
        completed.message = format!("{} [{}]", completed.message, fingerprint(&payload));
        self.store.append_event(pipeline_id, completed).await?;

        let phase = stage.success_phase();
        tracing::info!(pipeline_id, stage = %stage, phase = %phase, "stage committed");
        Ok(StageReport {
            stage,
            output,
            phase,
            idempotent: false,
        })
    }

    /// Clears the lease and reverts the phase so the stage stays callable.
    /// Gate failures drop back to review instead of the retry phase.
    async fn revert(
        &self,
        pipeline_id: &str,
        stage: StageId,
        token: &str,
        err: RenderflowError,
    ) -> RenderflowError {
        let (revert_to, entry) = match &err {
            RenderflowError::GateFailed { blocking, .. } => (
                Phase::RenderReview,
                EventLogEntry::gate_failed(stage, *blocking),
            ),
            RenderflowError::Paused { .. } => {
                (stage.retry_phase(), EventLogEntry::paused(stage.step()))
            }
            other => (
                stage.retry_phase(),
                EventLogEntry::stage_failed(stage, &other.to_string()),
            ),
        };

        tracing::warn!(
            pipeline_id,
            stage = %stage,
            code = err.code(),
            revert_to = %revert_to,
            error = %err,
            "stage reverted"
        );
        if let Err(store_err) = self
            .store
            .fail_stage(pipeline_id, revert_to, token, &err.to_string())
            .await
        {
            return store_err;
        }
        if let Err(store_err) = self.store.append_event(pipeline_id, entry).await {
            return store_err;
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AreaSpec, AssetRef, PipelineRun};
    use crate::qa::RuleQaValidator;
    use crate::stages::{DetectStage, MergeStage, StylizeStage};
    use crate::store::InMemoryRunStore;
    use crate::testing::{MockBackend, MockStorage};
    use chrono::Duration;

    fn runner_with(
        backend: Arc<MockBackend>,
        config: OrchestratorConfig,
    ) -> (StageRunner, Arc<InMemoryRunStore>) {
        let store = Arc::new(InMemoryRunStore::new());
        let runner = StageRunner::new(
            store.clone(),
            backend,
            Arc::new(MockStorage::new()),
            Arc::new(RuleQaValidator::new()),
            config,
        );
        (runner, store)
    }

    async fn insert_run(store: &InMemoryRunStore) -> String {
        let run = PipelineRun::new("owner-1", AssetRef::new("sources", "src.png"));
        let id = run.id.clone();
        store.insert_run(run).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_dispatch_commits_success_phase() {
        let backend = Arc::new(MockBackend::new());
        let (runner, store) = runner_with(backend, OrchestratorConfig::default());
        let id = insert_run(&store).await;

        let report = runner.dispatch(&id, &StylizeStage).await.unwrap();
        assert_eq!(report.stage, StageId::Stylize);
        assert_eq!(report.phase, Phase::DetectPending);
        assert!(!report.idempotent);

        let run = store.get_run(&id).await.unwrap();
        assert_eq!(run.phase, Phase::DetectPending);
        assert_eq!(run.current_step, 2);
        assert!(run.job_token.is_none());

        let kinds: Vec<String> = store
            .events(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec!["stage.started", "stage.completed"]);
    }

    #[tokio::test]
    async fn test_dispatch_out_of_order_stage_rejected() {
        let backend = Arc::new(MockBackend::new());
        let (runner, store) = runner_with(backend, OrchestratorConfig::default());
        let id = insert_run(&store).await;

        let err = runner.dispatch(&id, &DetectStage).await.unwrap_err();
        assert_eq!(err.code(), "PHASE_MISMATCH");
        // Rejection leaves the run untouched.
        let run = store.get_run(&id).await.unwrap();
        assert_eq!(run.phase, Phase::Created);
        assert!(store.events(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_dispatch_is_idempotent() {
        let backend = Arc::new(MockBackend::new());
        let (runner, store) = runner_with(backend.clone(), OrchestratorConfig::default());
        let id = insert_run(&store).await;

        let first = runner.dispatch(&id, &StylizeStage).await.unwrap();
        let second = runner.dispatch(&id, &StylizeStage).await.unwrap();
        assert!(second.idempotent);
        assert_eq!(second.output, first.output);
        // The handler did not run again.
        assert_eq!(backend.generate_calls(), 1);
    }

    #[tokio::test]
    async fn test_fresh_lease_rejected_with_last_activity() {
        let backend = Arc::new(MockBackend::new());
        let (runner, store) = runner_with(backend, OrchestratorConfig::default());
        let id = insert_run(&store).await;

        store
            .acquire_lease(&id, StageId::Stylize, "job:other", false)
            .await
            .unwrap();
        store
            .append_event(&id, EventLogEntry::stage_started(StageId::Stylize))
            .await
            .unwrap();

        let err = runner.dispatch(&id, &StylizeStage).await.unwrap_err();
        match err {
            RenderflowError::AlreadyRunning { stage, since } => {
                assert_eq!(stage, StageId::Stylize);
                assert!(since.ends_with("+00:00"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_lease_is_reclaimed() {
        let backend = Arc::new(MockBackend::new());
        let (runner, store) = runner_with(backend, OrchestratorConfig::default());
        let id = insert_run(&store).await;

        store
            .acquire_lease(&id, StageId::Stylize, "job:dead", false)
            .await
            .unwrap();
        let mut old = EventLogEntry::stage_started(StageId::Stylize);
        old.timestamp = now() - Duration::seconds(600);
        store.append_event(&id, old).await.unwrap();

        let report = runner.dispatch(&id, &StylizeStage).await.unwrap();
        assert!(!report.idempotent);
        assert_eq!(report.phase, Phase::DetectPending);
    }

    #[tokio::test]
    async fn test_failed_stage_reverts_to_retry_phase() {
        let backend = Arc::new(MockBackend::new().with_upstream_failures(1));
        let (runner, store) = runner_with(backend, OrchestratorConfig::default());
        let id = insert_run(&store).await;

        let err = runner.dispatch(&id, &StylizeStage).await.unwrap_err();
        assert_eq!(err.code(), "UPSTREAM_FAILURE");

        let run = store.get_run(&id).await.unwrap();
        assert_eq!(run.phase, Phase::StylizePending);
        assert!(run.job_token.is_none());
        assert!(run.last_error.is_some());

        // The stage stays callable and succeeds on the next call.
        let report = runner.dispatch(&id, &StylizeStage).await.unwrap();
        assert_eq!(report.phase, Phase::DetectPending);
    }

    #[tokio::test]
    async fn test_gate_failure_reverts_to_review() {
        let backend = Arc::new(MockBackend::new());
        let (runner, store) = runner_with(backend, OrchestratorConfig::default());
        let id = insert_run(&store).await;

        store
            .complete_stage(
                &id,
                StageId::Detect,
                "job:seed",
                StageOutput::Detect {
                    areas: vec![AreaSpec::new("a1", "kitchen")],
                },
            )
            .await
            .unwrap();
        // Detect completion put the run at RenderPending; force it to the
        // merge entry phase with no approved items.
        store.commit_transition(&id, Phase::MergePending).await.unwrap();

        let err = runner.dispatch(&id, &MergeStage).await.unwrap_err();
        assert_eq!(err.code(), "GATE_FAILED");

        let run = store.get_run(&id).await.unwrap();
        assert_eq!(run.phase, Phase::RenderReview);
        assert_eq!(run.current_step, 3);
        let events = store.events(&id).await.unwrap();
        assert!(events.iter().any(|e| e.kind == "gate.failed"));
    }

    #[tokio::test]
    async fn test_paused_run_refuses_dispatch() {
        let backend = Arc::new(MockBackend::new());
        let (runner, store) = runner_with(backend.clone(), OrchestratorConfig::default());
        let id = insert_run(&store).await;

        store.set_run_state(&id, RunState::Paused).await.unwrap();
        let err = runner.dispatch(&id, &StylizeStage).await.unwrap_err();
        assert_eq!(err.code(), "PAUSED");
        assert_eq!(backend.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_aborted_run_refuses_dispatch() {
        let backend = Arc::new(MockBackend::new());
        let (runner, store) = runner_with(backend, OrchestratorConfig::default());
        let id = insert_run(&store).await;

        store.set_run_state(&id, RunState::Aborted).await.unwrap();
        let err = runner.dispatch(&id, &StylizeStage).await.unwrap_err();
        assert_eq!(err.code(), "ABORTED");
    }

    #[tokio::test]
    async fn test_completed_event_carries_fingerprint() {
        let backend = Arc::new(MockBackend::new());
        let (runner, store) = runner_with(backend, OrchestratorConfig::default());
        let id = insert_run(&store).await;

        runner.dispatch(&id, &StylizeStage).await.unwrap();
        let events = store.events(&id).await.unwrap();
        let completed = events.iter().find(|e| e.kind == "stage.completed").unwrap();
        assert!(completed.message.contains('['));
    }
}
