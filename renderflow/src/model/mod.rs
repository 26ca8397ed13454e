//! Persisted data model: runs, stage outputs, work items, QA results.

pub mod outputs;
pub mod qa;
pub mod run;
pub mod work_item;

pub use outputs::{AreaSpec, AssetRef, RenderDescriptor, StageOutput};
pub use qa::{QaReason, QaResult, QaStatus, RequiredChange, Severity};
pub use run::{PipelineRun, RunState};
pub use work_item::{Variant, WorkItem, WorkItemStatus};
