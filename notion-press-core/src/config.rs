use crate::pipeline::DEFAULT_MAX_DEPTH;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Tuning for the orchestrator and the batch processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Nesting bound for block conversion.
    pub max_depth: usize,
    /// Pages per batch chunk.
    pub chunk_size: usize,
    /// Pause between chunks.
    pub chunk_stagger_ms: u64,
    /// Concurrent page syncs within a chunk.
    pub workers: usize,
    /// Age after which a `syncing` row counts as abandoned.
    pub syncing_ttl_secs: u64,
    pub retry: RetryConfig,
}

impl SyncConfig {
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_chunk_stagger(mut self, stagger: Duration) -> Self {
        self.chunk_stagger_ms = stagger.as_millis() as u64;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_syncing_ttl(mut self, ttl: Duration) -> Self {
        self.syncing_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn chunk_stagger(&self) -> Duration {
        Duration::from_millis(self.chunk_stagger_ms)
    }

    pub fn syncing_ttl(&self) -> Duration {
        Duration::from_secs(self.syncing_ttl_secs)
    }

    pub fn trace_loaded(&self) {
        info!(
            max_depth = self.max_depth,
            chunk_size = self.chunk_size,
            workers = self.workers,
            syncing_ttl_secs = self.syncing_ttl_secs,
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            chunk_size: 10,
            chunk_stagger_ms: 500,
            workers: 4,
            syncing_ttl_secs: 600,
            retry: RetryConfig::default(),
        }
    }
}
