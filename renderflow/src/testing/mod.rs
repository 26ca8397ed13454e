//! Test doubles for the external collaborators, plus context helpers
//! used by stage handler tests.

pub mod mocks;

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::model::{AssetRef, PipelineRun};
use crate::ports::{BlobStorage, GenerationBackend};
use crate::phase::StageId;
use crate::qa::{RetryEscalationPolicy, RuleQaValidator};
use crate::stages::StageContext;
use crate::store::{InMemoryRunStore, RunStore};

pub use mocks::{MockBackend, MockStorage, StaticIdentity};

/// Builds a stage context around a fresh run in an in-memory store.
///
/// The run is inserted as "owner-1" with a source asset, and the context
/// token "job:test" holds the stylize lease, as the runner would have
/// arranged before handing a handler its context. Tests that seed later
/// stages with `complete_stage` pass the same token and re-acquire the
/// lease for the stage under test. The returned store handle lets tests
/// seed outputs or inspect state.
pub async fn stage_context(
    backend: Arc<dyn GenerationBackend>,
    storage: Arc<dyn BlobStorage>,
) -> (StageContext, Arc<InMemoryRunStore>) {
    let store = Arc::new(InMemoryRunStore::new());
    let run = PipelineRun::new("owner-1", AssetRef::new("sources", "src.png"));
    store
        .insert_run(run.clone())
        .await
        .unwrap_or_else(|_| unreachable!("fresh store cannot hold the run yet"));
    let run = store
        .acquire_lease(&run.id, StageId::Stylize, "job:test", false)
        .await
        .unwrap_or_else(|_| unreachable!("a fresh run admits the stylize lease"));

    let config = OrchestratorConfig::new()
        .with_wave_pause_ms(1)
        .with_base_delay_ms(1)
        .with_max_delay_ms(10);

    let ctx = StageContext {
        run,
        store: store.clone(),
        backend,
        storage,
        validator: Arc::new(RuleQaValidator::new()),
        policy: RetryEscalationPolicy::new(config.max_attempts),
        config,
        job_token: "job:test".to_string(),
    };
    (ctx, store)
}
