//! Cancellable, progress-reporting batches of page syncs.
//!
//! A batch is split into chunks of `chunk_size` pages. Pages inside a chunk
//! run concurrently (at most `workers` at once); chunk N+1 is never started
//! before chunk N has finished. Between chunks the processor checks the
//! cancel flag and then waits `chunk_stagger` to stay under source rate
//! limits. Cancellation is cooperative: a running chunk always finishes.
//!
//! Batch metadata lives in memory only; [`BatchProcessor::purge_finished`]
//! drops terminal batches past a retention window.

use crate::config::SyncConfig;
use crate::contract::PageSyncer;
use crate::synchronise::SyncOptions;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Cancelled)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub total: usize,
    pub chunk_size: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchProgress {
    pub fn processed(&self) -> usize {
        self.completed_count + self.failed_count
    }
}

#[derive(Debug, Default)]
struct Timeline {
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

struct BatchState {
    id: Uuid,
    item_ids: Vec<String>,
    chunk_size: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancel_requested: AtomicBool,
    status: watch::Sender<BatchStatus>,
    timeline: Mutex<Timeline>,
}

impl BatchState {
    fn status(&self) -> BatchStatus {
        *self.status.borrow()
    }

    fn timeline(&self) -> std::sync::MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn progress(&self) -> BatchProgress {
        let timeline = self.timeline();
        BatchProgress {
            batch_id: self.id,
            status: self.status(),
            total: self.item_ids.len(),
            chunk_size: self.chunk_size,
            completed_count: self.completed.load(Ordering::SeqCst),
            failed_count: self.failed.load(Ordering::SeqCst),
            started_at: timeline.started_at,
            completed_at: timeline.completed_at,
        }
    }

    fn start(&self) {
        self.timeline().started_at = Some(Utc::now());
        self.status.send_replace(BatchStatus::Processing);
    }

    fn finish(&self, status: BatchStatus) {
        self.timeline().completed_at = Some(Utc::now());
        self.status.send_replace(status);
    }
}

pub struct BatchProcessor {
    syncer: Arc<dyn PageSyncer>,
    chunk_size: usize,
    workers: usize,
    chunk_stagger: Duration,
    batches: Mutex<HashMap<Uuid, Arc<BatchState>>>,
}

impl BatchProcessor {
    pub fn new(syncer: Arc<dyn PageSyncer>, config: &SyncConfig) -> Self {
        Self {
            syncer,
            chunk_size: config.chunk_size.max(1),
            workers: config.workers.max(1),
            chunk_stagger: config.chunk_stagger(),
            batches: Mutex::new(HashMap::new()),
        }
    }

    fn batches(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<BatchState>>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self, batch_id: Uuid) -> Option<Arc<BatchState>> {
        self.batches().get(&batch_id).cloned()
    }

    /// Queues `source_ids` for sync and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_batch(&self, source_ids: Vec<String>) -> Uuid {
        self.start_batch_with_options(source_ids, SyncOptions::default())
    }

    pub fn start_batch_with_options(&self, source_ids: Vec<String>, options: SyncOptions) -> Uuid {
        let (status, _) = watch::channel(BatchStatus::Queued);
        let state = Arc::new(BatchState {
            id: Uuid::new_v4(),
            item_ids: source_ids,
            chunk_size: self.chunk_size,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cancel_requested: AtomicBool::new(false),
            status,
            timeline: Mutex::new(Timeline::default()),
        });
        let batch_id = state.id;
        self.batches().insert(batch_id, Arc::clone(&state));
        info!(
            %batch_id,
            total = state.item_ids.len(),
            chunk_size = self.chunk_size,
            "[BATCH] Batch queued"
        );

        let syncer = Arc::clone(&self.syncer);
        let workers = self.workers;
        let stagger = self.chunk_stagger;
        tokio::spawn(async move {
            run_batch(syncer, state, workers, stagger, options).await;
        });
        batch_id
    }

    pub fn progress(&self, batch_id: Uuid) -> Option<BatchProgress> {
        self.state(batch_id).map(|state| state.progress())
    }

    /// Requests cancellation. False for unknown or already finished batches.
    pub fn cancel(&self, batch_id: Uuid) -> bool {
        let Some(state) = self.state(batch_id) else {
            return false;
        };
        if state.status().is_terminal() {
            return false;
        }
        state.cancel_requested.store(true, Ordering::SeqCst);
        info!(%batch_id, "[BATCH] Cancellation requested");
        true
    }

    /// Waits until the batch reaches a terminal status.
    pub async fn wait(&self, batch_id: Uuid) -> Option<BatchProgress> {
        let state = self.state(batch_id)?;
        let mut rx = state.status.subscribe();
        // The sender lives in `state`, so the channel cannot close here.
        let _ = rx.wait_for(|status| status.is_terminal()).await;
        Some(state.progress())
    }

    /// Drops finished batches that completed at least `older_than` ago.
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };
        let mut batches = self.batches();
        let before = batches.len();
        batches.retain(|_, state| {
            let finished_at = state.timeline().completed_at;
            !(state.status().is_terminal() && finished_at.is_some_and(|at| at <= cutoff))
        });
        let purged = before - batches.len();
        if purged > 0 {
            debug!(purged, "[BATCH] Purged finished batches");
        }
        purged
    }
}

async fn run_batch(
    syncer: Arc<dyn PageSyncer>,
    state: Arc<BatchState>,
    workers: usize,
    stagger: Duration,
    options: SyncOptions,
) {
    let batch_id = state.id;
    state.start();

    for (index, chunk) in state.item_ids.chunks(state.chunk_size).enumerate() {
        if index > 0 && !stagger.is_zero() {
            tokio::time::sleep(stagger).await;
        }
        if state.cancel_requested.load(Ordering::SeqCst) {
            let progress = state.progress();
            warn!(
                %batch_id,
                processed = progress.processed(),
                total = progress.total,
                "[BATCH] Batch cancelled"
            );
            state.finish(BatchStatus::Cancelled);
            return;
        }

        stream::iter(chunk)
            .for_each_concurrent(workers, |source_id| {
                let syncer = &syncer;
                let state = &state;
                async move {
                    let result = syncer.sync_page(source_id, options).await;
                    if result.success() {
                        state.completed.fetch_add(1, Ordering::SeqCst);
                    } else {
                        state.failed.fetch_add(1, Ordering::SeqCst);
                        debug!(
                            %batch_id,
                            source_id = %source_id,
                            outcome = %result.outcome,
                            error = ?result.error,
                            "[BATCH] Item failed"
                        );
                    }
                }
            })
            .await;

        let progress = state.progress();
        info!(
            %batch_id,
            chunk = index + 1,
            completed = progress.completed_count,
            failed = progress.failed_count,
            total = progress.total,
            "[BATCH] Chunk finished"
        );
    }

    let progress = state.progress();
    info!(
        %batch_id,
        completed = progress.completed_count,
        failed = progress.failed_count,
        "[BATCH] Batch completed"
    );
    state.finish(BatchStatus::Completed);
}
