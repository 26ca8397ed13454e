//! Step 5: panoramas to final composite.

use async_trait::async_trait;

use super::{StageContext, StageHandler};
use crate::errors::RenderflowError;
use crate::model::StageOutput;
use crate::phase::StageId;
use crate::ports::GenerationRequest;

/// Combines every area panorama into the final composite image.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeStage;

#[async_trait]
impl StageHandler for CompositeStage {
    fn stage(&self) -> StageId {
        StageId::Composite
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, RenderflowError> {
        let panoramas = match ctx.store.get_stage_output(&ctx.run.id, StageId::Merge).await? {
            Some(StageOutput::Merge { panoramas }) => panoramas,
            _ => {
                return Err(RenderflowError::MissingInput {
                    stage: StageId::Composite,
                    what: "merged panoramas output".to_string(),
                })
            }
        };
        if panoramas.is_empty() {
            return Err(RenderflowError::MissingInput {
                stage: StageId::Composite,
                what: "at least one panorama".to_string(),
            });
        }

        let request = GenerationRequest::new(&ctx.run.id, StageId::Composite, panoramas);
        let content = ctx.backend.generate(&request).await?;
        let composite_ref = ctx
            .storage
            .store(
                "composites",
                &format!("{}/composite.png", ctx.run.id),
                content.bytes,
            )
            .await?;

        tracing::info!(pipeline_id = %ctx.run.id, asset = %composite_ref.address(), "composite stored");
        Ok(StageOutput::Composite { composite_ref })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssetRef;
    use crate::store::RunStore;
    use crate::testing::{stage_context, MockBackend, MockStorage};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_composite_requires_merge_output() {
        let backend = Arc::new(MockBackend::new());
        let (ctx, _store) = stage_context(backend, Arc::new(MockStorage::new())).await;

        let err = CompositeStage.execute(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "MISSING_INPUT");
    }

    #[tokio::test]
    async fn test_composite_combines_panoramas() {
        let backend = Arc::new(MockBackend::new());
        let storage = Arc::new(MockStorage::new());
        let (ctx, store) = stage_context(backend.clone(), storage.clone()).await;
        store
            .complete_stage(
                &ctx.run.id,
                StageId::Merge,
                "job:test",
                StageOutput::Merge {
                    panoramas: vec![
                        AssetRef::new("panoramas", "p/a1/panorama.png"),
                        AssetRef::new("panoramas", "p/a2/panorama.png"),
                    ],
                },
            )
            .await
            .unwrap();

        let output = CompositeStage.execute(&ctx).await.unwrap();
        match output {
            StageOutput::Composite { composite_ref } => {
                assert_eq!(composite_ref.bucket, "composites");
                assert!(composite_ref.path.ends_with("composite.png"));
            }
            other => panic!("unexpected output: {other:?}"),
        }
        assert_eq!(backend.generate_calls(), 1);
        assert_eq!(storage.recorded_puts().len(), 1);
    }
}
