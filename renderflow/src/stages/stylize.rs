//! Step 1: source image to styled image.

use async_trait::async_trait;

use super::{StageContext, StageHandler};
use crate::errors::RenderflowError;
use crate::model::StageOutput;
use crate::phase::StageId;
use crate::ports::GenerationRequest;

/// Generates the styled base image from the pipeline's source asset.
#[derive(Debug, Clone, Copy, Default)]
pub struct StylizeStage;

#[async_trait]
impl StageHandler for StylizeStage {
    fn stage(&self) -> StageId {
        StageId::Stylize
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, RenderflowError> {
        let request = GenerationRequest::new(
            &ctx.run.id,
            StageId::Stylize,
            vec![ctx.run.source_ref.clone()],
        );
        let content = ctx.backend.generate(&request).await?;

        let styled_ref = ctx
            .storage
            .store("styled", &format!("{}/styled.png", ctx.run.id), content.bytes)
            .await?;

        tracing::info!(pipeline_id = %ctx.run.id, asset = %styled_ref.address(), "styled image stored");
        Ok(StageOutput::Stylize { styled_ref })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stage_context, MockBackend, MockStorage};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stylize_stores_and_reports_styled_ref() {
        let backend = Arc::new(MockBackend::new());
        let storage = Arc::new(MockStorage::new());
        let (ctx, _store) = stage_context(backend.clone(), storage.clone()).await;

        let output = StylizeStage.execute(&ctx).await.unwrap();
        match output {
            StageOutput::Stylize { styled_ref } => {
                assert_eq!(styled_ref.bucket, "styled");
                assert!(styled_ref.path.ends_with("styled.png"));
            }
            other => panic!("unexpected output: {other:?}"),
        }
        assert_eq!(backend.generate_calls(), 1);
        assert_eq!(storage.recorded_puts().len(), 1);
    }

    #[tokio::test]
    async fn test_stylize_propagates_upstream_failure() {
        let backend = Arc::new(MockBackend::new().with_upstream_failures(1));
        let storage = Arc::new(MockStorage::new());
        let (ctx, _store) = stage_context(backend, storage).await;

        let err = StylizeStage.execute(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "UPSTREAM_FAILURE");
    }
}
