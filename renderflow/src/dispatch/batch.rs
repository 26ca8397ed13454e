//! Concurrency-capped wave processing with backoff.
//!
//! Pending items are partitioned into fixed-size waves; each wave runs
//! concurrently and completes fully before the next begins, with a short
//! fixed pause in between. Items signalling "needs retry" re-enter a
//! later wave after an exponential-backoff delay instead of retrying
//! immediately. The loop terminates when the dynamically growing queue
//! drains.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::VecDeque;
use tokio::time::{sleep, sleep_until, Duration, Instant};

use super::backoff::Backoff;

/// One queued unit of work: (item, attempt, ready time).
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// The work item to process.
    pub item_id: String,
    /// The attempt this entry represents (1-indexed).
    pub attempt: u32,
    /// Earliest time the entry may be scheduled.
    pub ready_at: Instant,
}

impl QueueEntry {
    /// Creates an immediately-ready entry for a first attempt.
    #[must_use]
    pub fn immediate(item_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            item_id: item_id.into(),
            attempt,
            ready_at: Instant::now(),
        }
    }
}

/// Outcome of processing one item once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Terminally approved.
    Approved,
    /// Needs another attempt; the dispatcher re-enqueues with backoff.
    Retry {
        /// The attempt number the retry will be.
        next_attempt: u32,
    },
    /// Escalated to human review; excluded from further dispatch.
    Blocked,
    /// Permanently failed without escalation. Isolated; never poisons
    /// the batch.
    Failed,
}

/// Processes one item attempt. Persisting item state is the worker's
/// responsibility; the dispatcher only schedules.
#[async_trait]
pub trait ItemWorker: Send + Sync {
    /// Runs one attempt for the item.
    async fn process(&self, item_id: &str, attempt: u32) -> ItemOutcome;
}

/// Whether to keep dispatching after a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveControl {
    /// Start the next wave.
    Continue,
    /// Stop cooperatively; queued entries are abandoned.
    Stop,
}

/// Hook invoked after every completed wave. Used for heartbeats,
/// progress events, and cooperative pause checks.
#[async_trait]
pub trait WaveObserver: Send + Sync {
    /// Called once per completed wave with the running tally.
    async fn on_wave_complete(&self, wave: usize, tally: &BatchTally) -> WaveControl;
}

/// Observer that never stops dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

#[async_trait]
impl WaveObserver for NoOpObserver {
    async fn on_wave_complete(&self, _wave: usize, _tally: &BatchTally) -> WaveControl {
        WaveControl::Continue
    }
}

/// Running tallies of a dispatch run. Drives the subsequent
/// phase-transition decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTally {
    /// Items terminally approved.
    pub completed: usize,
    /// Items permanently failed.
    pub failed: usize,
    /// Retry re-enqueues issued.
    pub retried: usize,
    /// Items escalated to human review.
    pub blocked: usize,
    /// Total worker invocations.
    pub invocations: usize,
    /// Waves issued.
    pub waves: usize,
    /// True if dispatch stopped before the queue drained.
    pub stopped: bool,
}

/// Wave-based dispatcher with bounded concurrency and backoff.
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    wave_size: usize,
    wave_pause: Duration,
    backoff: Backoff,
}

impl BatchDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(wave_size: usize, wave_pause: Duration, backoff: Backoff) -> Self {
        Self {
            wave_size: wave_size.max(1),
            wave_pause,
            backoff,
        }
    }

    /// Drains the queue, processing waves until no entries remain or the
    /// observer stops dispatch.
    pub async fn run(
        &self,
        seeds: Vec<QueueEntry>,
        worker: &dyn ItemWorker,
        observer: &dyn WaveObserver,
    ) -> BatchTally {
        let mut queue: VecDeque<QueueEntry> = seeds.into();
        let mut tally = BatchTally::default();

        while !queue.is_empty() {
            // Entries not yet ready defer to later waves.
            let mut entries: Vec<QueueEntry> = queue.drain(..).collect();
            entries.sort_by_key(|e| e.ready_at);

            if entries[0].ready_at > Instant::now() {
                sleep_until(entries[0].ready_at).await;
            }

            let now = Instant::now();
            let mut wave = Vec::with_capacity(self.wave_size);
            let mut deferred = VecDeque::new();
            for entry in entries {
                if wave.len() < self.wave_size && entry.ready_at <= now {
                    wave.push(entry);
                } else {
                    deferred.push_back(entry);
                }
            }
            queue = deferred;

            let outcomes = join_all(
                wave.iter()
                    .map(|entry| worker.process(&entry.item_id, entry.attempt)),
            )
            .await;

            tally.invocations += wave.len();
            tally.waves += 1;

            for (entry, outcome) in wave.into_iter().zip(outcomes) {
                match outcome {
                    ItemOutcome::Approved => tally.completed += 1,
                    ItemOutcome::Failed => tally.failed += 1,
                    ItemOutcome::Blocked => tally.blocked += 1,
                    ItemOutcome::Retry { next_attempt } => {
                        let delay = self.backoff.delay_for(next_attempt.saturating_sub(1));
                        tracing::debug!(
                            item_id = %entry.item_id,
                            next_attempt,
                            delay_ms = delay.as_millis() as u64,
                            "re-enqueueing item with backoff"
                        );
                        tally.retried += 1;
                        queue.push_back(QueueEntry {
                            item_id: entry.item_id,
                            attempt: next_attempt,
                            ready_at: Instant::now() + delay,
                        });
                    }
                }
            }

            if observer.on_wave_complete(tally.waves, &tally).await == WaveControl::Stop {
                tally.stopped = true;
                break;
            }

            if !queue.is_empty() {
                sleep(self.wave_pause).await;
            }
        }

        tally
    }
}
