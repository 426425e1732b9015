//! Exponential backoff for transient source API failures.
//!
//! [`RetryingFetcher`] wraps any [`ContentFetcher`] and repeats calls that
//! fail with a retryable [`FetchError`] (rate limits, unreachable, 5xx).
//! A server `Retry-After` hint wins when it is longer than the computed
//! backoff. When attempts run out the last error is returned unchanged.

use crate::contract::{BlockPage, ContentFetcher, PageSummary};
use crate::error::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }

    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before retry number `attempt` (1-based; 0 means no delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay_ms as f64
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(base.min(self.max_delay_ms as f64) as u64)
    }

    /// Delay before retrying after `err`, honoring a longer server hint.
    pub fn delay_after(&self, err: &FetchError, attempt: u32) -> Duration {
        let backoff = self.delay_for_attempt(attempt);
        match err {
            FetchError::RateLimited {
                retry_after: Some(hint),
            } => backoff.max(*hint),
            _ => backoff,
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, Fut, Op>(&self, label: &str, mut op: Op) -> Result<T, FetchError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_after(&err, attempt);
                    warn!(
                        call = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient source error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

/// A [`ContentFetcher`] that retries transient failures of the one it wraps.
pub struct RetryingFetcher<F> {
    inner: F,
    config: RetryConfig,
}

impl<F> RetryingFetcher<F> {
    pub fn new(inner: F, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: ContentFetcher> ContentFetcher for RetryingFetcher<F> {
    async fn list_accessible_pages(&self) -> Result<Vec<PageSummary>, FetchError> {
        self.config
            .run("list_accessible_pages", || self.inner.list_accessible_pages())
            .await
    }

    async fn fetch_page(&self, page_id: &str) -> Result<PageSummary, FetchError> {
        self.config
            .run("fetch_page", || self.inner.fetch_page(page_id))
            .await
    }

    async fn fetch_blocks(
        &self,
        block_id: &str,
        cursor: Option<String>,
    ) -> Result<BlockPage, FetchError> {
        self.config
            .run("fetch_blocks", || self.inner.fetch_blocks(block_id, cursor.clone()))
            .await
    }
}
