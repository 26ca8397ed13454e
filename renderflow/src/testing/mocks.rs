//! Mock collaborators that record calls and return scripted results.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::errors::RenderflowError;
use crate::model::{AreaSpec, AssetRef, RenderDescriptor, Variant};
use crate::phase::StageId;
use crate::ports::{BlobStorage, GeneratedContent, GenerationBackend, IdentityVerifier};
use crate::ports::GenerationRequest;

/// A scriptable generation backend.
///
/// By default every render matches its area's expectations, so the rule
/// validator approves it. Rejections and upstream failures are scripted
/// per area variant or globally.
#[derive(Debug, Default)]
pub struct MockBackend {
    areas: Vec<AreaSpec>,
    bad_renders: Mutex<HashMap<(String, Variant), u32>>,
    upstream_failures: Mutex<u32>,
    generate_calls: Mutex<usize>,
    detect_calls: Mutex<usize>,
}

impl MockBackend {
    /// Creates a backend with no areas and no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the areas `detect_areas` will report.
    #[must_use]
    pub fn with_areas(mut self, areas: Vec<AreaSpec>) -> Self {
        self.areas = areas;
        self
    }

    /// Scripts the first `count` renders of an area variant to come back
    /// with the wrong content kind, so QA rejects them.
    #[must_use]
    pub fn with_bad_renders(self, area_id: &str, variant: Variant, count: u32) -> Self {
        self.bad_renders
            .lock()
            .insert((area_id.to_string(), variant), count);
        self
    }

    /// Scripts the first `count` generate calls to fail upstream.
    #[must_use]
    pub fn with_upstream_failures(self, count: u32) -> Self {
        *self.upstream_failures.lock() = count;
        self
    }

    /// Number of generate calls observed.
    #[must_use]
    pub fn generate_calls(&self) -> usize {
        *self.generate_calls.lock()
    }

    /// Number of detect calls observed.
    #[must_use]
    pub fn detect_calls(&self) -> usize {
        *self.detect_calls.lock()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, RenderflowError> {
        *self.generate_calls.lock() += 1;

        {
            let mut failures = self.upstream_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(RenderflowError::UpstreamFailure {
                    stage: request.stage,
                    reason: "scripted upstream failure".to_string(),
                });
            }
        }

        let descriptor = match (&request.area, request.variant) {
            (Some(area), Some(variant)) => {
                let mut bad = self.bad_renders.lock();
                let remaining = bad.entry((area.id.clone(), variant)).or_insert(0);
                if *remaining > 0 {
                    *remaining -= 1;
                    RenderDescriptor {
                        content_kind: "unrecognizable".to_string(),
                        elements: Vec::new(),
                        adjacent: Vec::new(),
                    }
                } else {
                    RenderDescriptor {
                        content_kind: area.content_kind.clone(),
                        elements: vec!["furniture".to_string()],
                        adjacent: area.required_adjacent.clone(),
                    }
                }
            }
            _ => RenderDescriptor {
                content_kind: request.stage.to_string(),
                elements: Vec::new(),
                adjacent: Vec::new(),
            },
        };

        Ok(GeneratedContent {
            bytes: b"image-bytes".to_vec(),
            descriptor,
        })
    }

    async fn detect_areas(
        &self,
        _pipeline_id: &str,
        _styled: &AssetRef,
    ) -> Result<Vec<AreaSpec>, RenderflowError> {
        *self.detect_calls.lock() += 1;
        if self.areas.is_empty() {
            return Err(RenderflowError::UpstreamFailure {
                stage: StageId::Detect,
                reason: "no areas configured".to_string(),
            });
        }
        Ok(self.areas.clone())
    }
}

/// Blob storage that records every put and returns the (bucket, path)
/// reference without storing bytes.
#[derive(Debug, Default)]
pub struct MockStorage {
    puts: Mutex<Vec<(String, String)>>,
    failures: Mutex<u32>,
}

impl MockStorage {
    /// Creates an empty storage mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the first `count` stores to fail.
    #[must_use]
    pub fn with_failures(self, count: u32) -> Self {
        *self.failures.lock() = count;
        self
    }

    /// Returns the recorded (bucket, path) pairs.
    #[must_use]
    pub fn recorded_puts(&self) -> Vec<(String, String)> {
        self.puts.lock().clone()
    }
}

#[async_trait]
impl BlobStorage for MockStorage {
    async fn store(
        &self,
        bucket: &str,
        path: &str,
        _bytes: Vec<u8>,
    ) -> Result<AssetRef, RenderflowError> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(RenderflowError::Storage(
                    "scripted storage failure".to_string(),
                ));
            }
        }
        self.puts
            .lock()
            .push((bucket.to_string(), path.to_string()));
        Ok(AssetRef::new(bucket, path))
    }
}

/// Identity verifier backed by a fixed token-to-owner table.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    users: HashMap<String, String>,
}

impl StaticIdentity {
    /// Creates an empty verifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bearer token for an owner.
    #[must_use]
    pub fn with_user(mut self, token: &str, owner: &str) -> Self {
        self.users.insert(token.to_string(), owner.to_string());
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentity {
    async fn resolve(&self, bearer: &str) -> Result<String, RenderflowError> {
        self.users
            .get(bearer)
            .cloned()
            .ok_or_else(|| RenderflowError::Unauthorized {
                owner: "unknown".to_string(),
                pipeline_id: String::new(),
            })
    }
}
