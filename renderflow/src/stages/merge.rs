//! Step 4: gate-checked panoramic merge of approved directional renders.

use async_trait::async_trait;

use super::{StageContext, StageHandler};
use crate::errors::RenderflowError;
use crate::gate::GateChecker;
use crate::model::{AssetRef, StageOutput, Variant, WorkItem};
use crate::phase::StageId;
use crate::ports::GenerationRequest;

/// Merges each area's forward and reverse renders into a panorama.
///
/// Entry is gated: every active area must have both variants terminally
/// approved, otherwise the stage fails with the blocking count and the
/// pipeline drops back to render review.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStage;

#[async_trait]
impl StageHandler for MergeStage {
    fn stage(&self) -> StageId {
        StageId::Merge
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, RenderflowError> {
        let areas = match ctx.store.get_stage_output(&ctx.run.id, StageId::Detect).await? {
            Some(StageOutput::Detect { areas }) => areas,
            _ => {
                return Err(RenderflowError::MissingInput {
                    stage: StageId::Merge,
                    what: "detected areas output".to_string(),
                })
            }
        };
        let items = ctx.store.list_items(&ctx.run.id).await?;

        let gate = GateChecker::check_all_approved(&areas, &items);
        if !gate.passed {
            tracing::warn!(
                pipeline_id = %ctx.run.id,
                blocking = gate.blocking,
                missing = ?gate.missing,
                "merge gate failed"
            );
            return Err(RenderflowError::GateFailed {
                stage: StageId::Merge,
                blocking: gate.blocking,
            });
        }

        let mut panoramas = Vec::new();
        for area in areas.iter().filter(|a| a.active) {
            let forward = approved_asset(&items, &area.id, Variant::Forward)?;
            let reverse = approved_asset(&items, &area.id, Variant::Reverse)?;

            let request = GenerationRequest::new(
                &ctx.run.id,
                StageId::Merge,
                vec![forward, reverse],
            );
            let content = ctx.backend.generate(&request).await?;
            let panorama = ctx
                .storage
                .store(
                    "panoramas",
                    &format!("{}/{}/panorama.png", ctx.run.id, area.id),
                    content.bytes,
                )
                .await?;
            panoramas.push(panorama);
        }

        tracing::info!(pipeline_id = %ctx.run.id, count = panoramas.len(), "panoramas merged");
        Ok(StageOutput::Merge { panoramas })
    }
}

/// The gate guarantees the item exists and is approved; a missing asset
/// reference on it is a data fault, not a gate failure.
fn approved_asset(
    items: &[WorkItem],
    area_id: &str,
    variant: Variant,
) -> Result<AssetRef, RenderflowError> {
    items
        .iter()
        .find(|item| item.area_id == area_id && item.variant == variant && item.is_gate_approved())
        .and_then(|item| item.asset_ref.clone())
        .ok_or_else(|| RenderflowError::MissingInput {
            stage: StageId::Merge,
            what: format!("approved {variant} render for area '{area_id}'"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AreaSpec, QaResult, WorkItemStatus};
    use crate::store::RunStore;
    use crate::testing::{stage_context, MockBackend, MockStorage};
    use std::sync::Arc;

    fn approved_item(pipeline: &str, area: &str, variant: Variant) -> WorkItem {
        let mut item = WorkItem::new(pipeline, area, variant);
        item.approve(QaResult::approved(0.95));
        item.asset_ref = Some(AssetRef::new(
            "renders",
            format!("{pipeline}/{area}/{variant}.png"),
        ));
        item
    }

    async fn seed_detect(store: &dyn RunStore, pipeline_id: &str, areas: Vec<AreaSpec>) {
        store
            .complete_stage(
                pipeline_id,
                StageId::Detect,
                "job:test",
                StageOutput::Detect { areas },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_merge_produces_panorama_per_area() {
        let backend = Arc::new(MockBackend::new());
        let storage = Arc::new(MockStorage::new());
        let (ctx, store) = stage_context(backend.clone(), storage.clone()).await;
        seed_detect(
            store.as_ref(),
            &ctx.run.id,
            vec![AreaSpec::new("a1", "kitchen"), AreaSpec::new("a2", "bedroom")],
        )
        .await;
        store
            .insert_items(vec![
                approved_item(&ctx.run.id, "a1", Variant::Forward),
                approved_item(&ctx.run.id, "a1", Variant::Reverse),
                approved_item(&ctx.run.id, "a2", Variant::Forward),
                approved_item(&ctx.run.id, "a2", Variant::Reverse),
            ])
            .await
            .unwrap();

        let output = MergeStage.execute(&ctx).await.unwrap();
        match output {
            StageOutput::Merge { panoramas } => {
                assert_eq!(panoramas.len(), 2);
                assert!(panoramas.iter().all(|p| p.bucket == "panoramas"));
            }
            other => panic!("unexpected output: {other:?}"),
        }
        assert_eq!(backend.generate_calls(), 2);
        assert_eq!(storage.recorded_puts().len(), 2);
    }

    #[tokio::test]
    async fn test_merge_gate_rejects_incomplete_batch() {
        let backend = Arc::new(MockBackend::new());
        let (ctx, store) = stage_context(backend.clone(), Arc::new(MockStorage::new())).await;
        seed_detect(store.as_ref(), &ctx.run.id, vec![AreaSpec::new("a1", "kitchen")]).await;

        let mut rejected = WorkItem::new(&ctx.run.id, "a1", Variant::Reverse);
        rejected.status = WorkItemStatus::Rejected;
        store
            .insert_items(vec![approved_item(&ctx.run.id, "a1", Variant::Forward), rejected])
            .await
            .unwrap();

        let err = MergeStage.execute(&ctx).await.unwrap_err();
        match err {
            RenderflowError::GateFailed { stage, blocking } => {
                assert_eq!(stage, StageId::Merge);
                assert_eq!(blocking, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The gate fires before any generation happens.
        assert_eq!(backend.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_merge_accepts_manually_locked_items() {
        let backend = Arc::new(MockBackend::new());
        let (ctx, store) = stage_context(backend, Arc::new(MockStorage::new())).await;
        seed_detect(store.as_ref(), &ctx.run.id, vec![AreaSpec::new("a1", "kitchen")]).await;

        let mut locked = WorkItem::new(&ctx.run.id, "a1", Variant::Reverse);
        locked.status = WorkItemStatus::BlockedForHuman;
        locked.approve_manually();
        locked.asset_ref = Some(AssetRef::new("renders", "manual/reverse.png"));
        store
            .insert_items(vec![approved_item(&ctx.run.id, "a1", Variant::Forward), locked])
            .await
            .unwrap();

        let output = MergeStage.execute(&ctx).await.unwrap();
        match output {
            StageOutput::Merge { panoramas } => assert_eq!(panoramas.len(), 1),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_merge_flags_approved_item_without_asset() {
        let backend = Arc::new(MockBackend::new());
        let (ctx, store) = stage_context(backend, Arc::new(MockStorage::new())).await;
        seed_detect(store.as_ref(), &ctx.run.id, vec![AreaSpec::new("a1", "kitchen")]).await;

        let mut bare = approved_item(&ctx.run.id, "a1", Variant::Reverse);
        bare.asset_ref = None;
        store
            .insert_items(vec![approved_item(&ctx.run.id, "a1", Variant::Forward), bare])
            .await
            .unwrap();

        let err = MergeStage.execute(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "MISSING_INPUT");
    }
}
