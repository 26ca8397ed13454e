//! Narrow contracts for external collaborators.
//!
//! The core treats generation, blob storage, and identity as opaque,
//! fallible services. Implementations live outside this crate; tests use
//! the mocks in [`crate::testing`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RenderflowError;
use crate::model::{AreaSpec, AssetRef, RenderDescriptor, Variant};
use crate::phase::StageId;

/// Context payload handed to the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The requesting pipeline.
    pub pipeline_id: String,
    /// The stage issuing the request.
    pub stage: StageId,
    /// The target area, for per-area stages.
    pub area: Option<AreaSpec>,
    /// The directional variant, for per-area renders.
    pub variant: Option<Variant>,
    /// Input assets the generation builds on.
    pub inputs: Vec<AssetRef>,
    /// Correction instruction seeded from the previous QA rejection.
    pub instruction: Option<String>,
}

impl GenerationRequest {
    /// Creates a request for a stage with the given inputs.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, stage: StageId, inputs: Vec<AssetRef>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            stage,
            area: None,
            variant: None,
            inputs,
            instruction: None,
        }
    }

    /// Targets a specific area variant.
    #[must_use]
    pub fn for_area(mut self, area: AreaSpec, variant: Variant) -> Self {
        self.area = Some(area);
        self.variant = Some(variant);
        self
    }

    /// Seeds the request with a correction instruction.
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }
}

/// Raw output of one generation call, before storage.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContent {
    /// The produced bytes.
    pub bytes: Vec<u8>,
    /// The backend's description of what it produced.
    pub descriptor: RenderDescriptor,
}

/// Opaque, fallible, retryable synthesis service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generates content for the given context payload.
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, RenderflowError>;

    /// Detects sub-areas in a styled image.
    async fn detect_areas(
        &self,
        pipeline_id: &str,
        styled: &AssetRef,
    ) -> Result<Vec<AreaSpec>, RenderflowError>;
}

/// Durable blob storage keyed by (bucket, path).
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores bytes and returns an addressable reference.
    async fn store(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<AssetRef, RenderflowError>;
}

/// Resolves a bearer credential to an owner identity.
///
/// Trusted for ownership checks; the core never inspects credentials
/// itself.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolves the credential, failing with `Unauthorized` when invalid.
    async fn resolve(&self, bearer: &str) -> Result<String, RenderflowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new(
            "p1",
            StageId::Render,
            vec![AssetRef::new("styled", "p1/styled.png")],
        )
        .for_area(AreaSpec::new("a1", "kitchen"), Variant::Forward)
        .with_instruction("remove the bed");

        assert_eq!(request.stage, StageId::Render);
        assert_eq!(request.variant, Some(Variant::Forward));
        assert_eq!(request.instruction.as_deref(), Some("remove the bed"));
    }
}
