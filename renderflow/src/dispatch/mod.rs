//! Stage dispatch: the idempotent stage runner and the wave-based batch
//! dispatcher.

pub mod backoff;
pub mod batch;
pub mod runner;

pub use backoff::{Backoff, JitterMode};
pub use batch::{
    BatchDispatcher, BatchTally, ItemOutcome, ItemWorker, NoOpObserver, QueueEntry,
    WaveControl, WaveObserver,
};
pub use runner::{StageReport, StageRunner};
