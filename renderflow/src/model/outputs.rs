//! Stage output payloads and asset references.
//!
//! Stage outputs are a tagged union keyed by stage name, validated on
//! read so a payload stored under the wrong stage key is caught instead
//! of silently misinterpreted.

use serde::{Deserialize, Serialize};

use crate::phase::StageId;

/// A reference into durable blob storage, keyed by (bucket, path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    /// The storage bucket.
    pub bucket: String,
    /// The object path within the bucket.
    pub path: String,
}

impl AssetRef {
    /// Creates a new asset reference.
    #[must_use]
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// Returns the full storage address as `bucket/path`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}/{}", self.bucket, self.path)
    }
}

/// A sub-area detected in the styled image.
///
/// Carries the expectations QA validates each render against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaSpec {
    /// Stable area identifier within the pipeline.
    pub id: String,
    /// The content kind expected in this area (e.g. "bedroom").
    pub content_kind: String,
    /// Elements that must appear adjacent to the area's content.
    #[serde(default)]
    pub required_adjacent: Vec<String>,
    /// Elements that must not appear in the render.
    #[serde(default)]
    pub forbidden: Vec<String>,
    /// Whether the area participates in the pipeline. Inactive areas are
    /// skipped by rendering and excluded from gate checks.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl AreaSpec {
    /// Creates an active area with the given id and content kind.
    #[must_use]
    pub fn new(id: impl Into<String>, content_kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_kind: content_kind.into(),
            required_adjacent: Vec::new(),
            forbidden: Vec::new(),
            active: true,
        }
    }

    /// Sets the required adjacent elements.
    #[must_use]
    pub fn with_required_adjacent(mut self, elements: Vec<String>) -> Self {
        self.required_adjacent = elements;
        self
    }

    /// Sets the forbidden elements.
    #[must_use]
    pub fn with_forbidden(mut self, elements: Vec<String>) -> Self {
        self.forbidden = elements;
        self
    }

    /// Marks the area inactive.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// What the generation backend reports about a produced render.
///
/// QA judges this descriptor, never the raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderDescriptor {
    /// The content kind the backend believes it produced.
    pub content_kind: String,
    /// Elements present in the render.
    #[serde(default)]
    pub elements: Vec<String>,
    /// Elements adjacent to the primary content.
    #[serde(default)]
    pub adjacent: Vec<String>,
}

/// Per-stage output payload, tagged by stage name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageOutput {
    /// Output of the stylize stage.
    Stylize {
        /// The styled image.
        styled_ref: AssetRef,
    },
    /// Output of the area-detection stage.
    Detect {
        /// Detected sub-areas.
        areas: Vec<AreaSpec>,
    },
    /// Output of the per-area render stage. Item-level refs live on the
    /// work items; the stage output records the batch outcome.
    Render {
        /// Items that reached terminal approval.
        approved: usize,
        /// Items blocked for human review.
        blocked: usize,
    },
    /// Output of the panoramic merge stage.
    Merge {
        /// One panorama per merged area group.
        panoramas: Vec<AssetRef>,
    },
    /// Output of the final composite stage.
    Composite {
        /// The final composite image.
        composite_ref: AssetRef,
    },
}

impl StageOutput {
    /// Returns the stage this output belongs to.
    #[must_use]
    pub fn stage(&self) -> StageId {
        match self {
            Self::Stylize { .. } => StageId::Stylize,
            Self::Detect { .. } => StageId::Detect,
            Self::Render { .. } => StageId::Render,
            Self::Merge { .. } => StageId::Merge,
            Self::Composite { .. } => StageId::Composite,
        }
    }
}
