//! Step 2: styled image to detected sub-areas.

use async_trait::async_trait;

use super::{StageContext, StageHandler};
use crate::errors::RenderflowError;
use crate::model::StageOutput;
use crate::phase::StageId;

/// Detects the sub-areas of the styled image that later stages render
/// individually.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectStage;

#[async_trait]
impl StageHandler for DetectStage {
    fn stage(&self) -> StageId {
        StageId::Detect
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, RenderflowError> {
        let styled_ref = match ctx.store.get_stage_output(&ctx.run.id, StageId::Stylize).await? {
            Some(StageOutput::Stylize { styled_ref }) => styled_ref,
            _ => {
                return Err(RenderflowError::MissingInput {
                    stage: StageId::Detect,
                    what: "styled image output".to_string(),
                })
            }
        };

        let areas = ctx.backend.detect_areas(&ctx.run.id, &styled_ref).await?;
        if areas.is_empty() {
            return Err(RenderflowError::MissingInput {
                stage: StageId::Detect,
                what: "at least one detected area".to_string(),
            });
        }

        tracing::info!(pipeline_id = %ctx.run.id, count = areas.len(), "areas detected");
        Ok(StageOutput::Detect { areas })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AreaSpec, AssetRef};
    use crate::store::RunStore;
    use crate::testing::{stage_context, MockBackend, MockStorage};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_detect_requires_styled_output() {
        let backend = Arc::new(MockBackend::new().with_areas(vec![AreaSpec::new("a1", "kitchen")]));
        let (ctx, _store) = stage_context(backend, Arc::new(MockStorage::new())).await;

        let err = DetectStage.execute(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "MISSING_INPUT");
    }

    #[tokio::test]
    async fn test_detect_reports_areas() {
        let backend = Arc::new(MockBackend::new().with_areas(vec![
            AreaSpec::new("a1", "kitchen"),
            AreaSpec::new("a2", "bedroom"),
        ]));
        let (ctx, store) = stage_context(backend.clone(), Arc::new(MockStorage::new())).await;

        store
            .complete_stage(
                &ctx.run.id,
                StageId::Stylize,
                "job:test",
                StageOutput::Stylize {
                    styled_ref: AssetRef::new("styled", "p/styled.png"),
                },
            )
            .await
            .unwrap();

        let output = DetectStage.execute(&ctx).await.unwrap();
        match output {
            StageOutput::Detect { areas } => assert_eq!(areas.len(), 2),
            other => panic!("unexpected output: {other:?}"),
        }
        assert_eq!(backend.detect_calls(), 1);
    }
}
