//! Per-page sync orchestration: metadata → delta check → lock → convert →
//! publish → terminal status.
//!
//! # Guarantees
//! - **Delta short-circuit.** A page whose mapping is `synced` and whose
//!   stored `source_modified_at` equals the source's current value returns
//!   [`SyncOutcome::Unchanged`] without fetching blocks, writing the store or
//!   touching the target. `force` bypasses this.
//! - **At most one sync per page.** Concurrent calls for the same id inside
//!   this process coalesce onto one run and share its result. Across
//!   processes the `syncing` status in the [`MappingStore`] is the lock; a
//!   live lock held elsewhere yields [`SyncOutcome::Conflict`].
//! - **No duplicate posts.** An existing mapping always updates its post. A
//!   new post is only created when there is no mapped post, or when the
//!   mapped post has disappeared from the target, in which case the mapping
//!   is re-pointed.
//! - **No stuck rows.** Every call that acquires the lock ends by writing
//!   `synced` or `error`. When the `synced` write itself fails the row is
//!   still released as `error`, so the next call can retry.
//! - **Fetch failures are recorded.** A mapped page whose metadata cannot be
//!   fetched is marked `error`, unless a live sync holds its row.
//!
//! # Error Handling
//! [`SyncOrchestrator::sync_one`] never returns `Err`: failures are reported
//! in the [`SyncResult`] and logged. Store failures during the terminal
//! write are reported the same way.

use crate::config::SyncConfig;
use crate::contract::{ContentFetcher, PageSummary, PageSyncer, Publisher};
use crate::converter::ConverterRegistry;
use crate::error::{ConflictError, FetchError, SyncError, UpsertError};
use crate::pipeline::BlockPipeline;
use crate::retry::RetryingFetcher;
use crate::store::{Claim, MappingStore, SyncMapping, SyncStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Re-sync even when the source is unchanged.
    pub force: bool,
}

impl SyncOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    Failed,
    Conflict,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Failed => "failed",
            SyncOutcome::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub source_id: String,
    pub outcome: SyncOutcome,
    pub target_id: Option<i64>,
    pub error: Option<String>,
}

impl SyncResult {
    fn new(source_id: &str, outcome: SyncOutcome, target_id: Option<i64>) -> Self {
        Self {
            source_id: source_id.to_string(),
            outcome,
            target_id,
            error: None,
        }
    }

    fn failed(source_id: &str, target_id: Option<i64>, err: impl fmt::Display) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::new(source_id, SyncOutcome::Failed, target_id)
        }
    }

    fn conflict(source_id: &str, target_id: Option<i64>) -> Self {
        let err = ConflictError {
            source_id: source_id.to_string(),
        };
        Self {
            error: Some(err.to_string()),
            ..Self::new(source_id, SyncOutcome::Conflict, target_id)
        }
    }

    /// True for created, updated and unchanged.
    pub fn success(&self) -> bool {
        matches!(
            self.outcome,
            SyncOutcome::Created | SyncOutcome::Updated | SyncOutcome::Unchanged
        )
    }
}

type InFlight = Mutex<HashMap<String, watch::Receiver<Option<SyncResult>>>>;

enum Slot {
    Leader(watch::Sender<Option<SyncResult>>),
    Follower(watch::Receiver<Option<SyncResult>>),
}

/// Removes the in-process entry even if the leading future is dropped.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    source_id: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.source_id);
    }
}

pub struct SyncOrchestrator<F, P, S: ?Sized> {
    fetcher: Arc<RetryingFetcher<F>>,
    publisher: P,
    store: Arc<S>,
    pipeline: BlockPipeline<RetryingFetcher<F>>,
    config: SyncConfig,
    in_flight: InFlight,
}

impl<F, P, S> SyncOrchestrator<F, P, S>
where
    F: ContentFetcher,
    P: Publisher,
    S: MappingStore + ?Sized,
{
    /// Source calls go through a [`RetryingFetcher`] built from `config.retry`.
    pub fn new(
        fetcher: F,
        publisher: P,
        store: Arc<S>,
        registry: Arc<ConverterRegistry>,
        config: SyncConfig,
    ) -> Self {
        let fetcher = Arc::new(RetryingFetcher::new(fetcher, config.retry.clone()));
        let pipeline = BlockPipeline::new(registry, Arc::clone(&fetcher));
        Self {
            fetcher,
            publisher,
            store,
            pipeline,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Every page the source exposes, for "sync everything" runs.
    pub async fn list_pages(&self) -> Result<Vec<PageSummary>, FetchError> {
        self.fetcher.list_accessible_pages().await
    }

    pub async fn sync_one(&self, source_id: &str, options: SyncOptions) -> SyncResult {
        info!(source_id, force = options.force, "[SYNC] Starting page sync");

        let mapping = match self.store.find(source_id) {
            Ok(mapping) => mapping,
            Err(err) => {
                error!(source_id, error = %err, "[SYNC][ERROR] Mapping lookup failed");
                return SyncResult::failed(source_id, None, err);
            }
        };
        let known_target = mapping.as_ref().and_then(|m| m.target_id);

        let page = match self.fetcher.fetch_page(source_id).await {
            Ok(page) => page,
            Err(err) => {
                warn!(source_id, error = %err, "[SYNC][ERROR] Fetching page metadata failed");
                if mapping.is_some() {
                    self.record_fetch_failure(source_id, &err);
                }
                return SyncResult::failed(source_id, known_target, err);
            }
        };

        if !options.force {
            if let Some(mapping) = &mapping {
                if is_unchanged(mapping, &page) {
                    info!(source_id, target_id = ?mapping.target_id, "[SYNC] Source unchanged, skipping");
                    return SyncResult::new(source_id, SyncOutcome::Unchanged, mapping.target_id);
                }
            }
        }

        let slot = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(source_id) {
                Some(rx) => Slot::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(source_id.to_string(), rx);
                    Slot::Leader(tx)
                }
            }
        };

        match slot {
            Slot::Follower(mut rx) => {
                debug!(source_id, "[SYNC] Joining in-flight sync of the same page");
                // `None` means the leading run was dropped before it finished.
                let shared = rx
                    .wait_for(Option::is_some)
                    .await
                    .ok()
                    .and_then(|value| (*value).clone());
                shared.unwrap_or_else(|| SyncResult::conflict(source_id, known_target))
            }
            Slot::Leader(tx) => {
                let _guard = InFlightGuard {
                    in_flight: &self.in_flight,
                    source_id,
                };
                let result = self.sync_locked(source_id, page).await;
                tx.send_replace(Some(result.clone()));
                result
            }
        }
    }

    async fn sync_locked(&self, source_id: &str, page: PageSummary) -> SyncResult {
        let attempt_at = Utc::now();
        let previous = match self
            .store
            .claim(source_id, attempt_at, self.config.syncing_ttl())
        {
            Ok(Claim::Acquired { previous }) => previous,
            Ok(Claim::InFlight(row)) => {
                warn!(
                    source_id,
                    target_id = ?row.target_id,
                    last_attempt_at = ?row.last_attempt_at,
                    "[SYNC] Another process holds this page, rejecting"
                );
                return SyncResult::conflict(source_id, row.target_id);
            }
            Err(err) => {
                error!(source_id, error = %err, "[SYNC][ERROR] Could not claim page");
                return SyncResult::failed(source_id, None, err);
            }
        };
        let base = previous.unwrap_or_else(|| SyncMapping::new(source_id, attempt_at));
        let previous_target = base.target_id;

        match self.convert_and_publish(&page, previous_target).await {
            Ok((outcome, target_id)) => {
                let now = Utc::now();
                let row = SyncMapping {
                    target_id: Some(target_id),
                    source_title: page.title.clone(),
                    source_modified_at: Some(page.modified_at),
                    target_modified_at: Some(now),
                    status: SyncStatus::Synced,
                    last_attempt_at: Some(attempt_at),
                    last_error: None,
                    updated_at: now,
                    ..base.clone()
                };
                if let Err(err) = self.store.upsert(&row) {
                    error!(source_id, target_id, error = %err, "[SYNC][ERROR] Post written but mapping update failed");
                    let message = format!("post {target_id} written but mapping not recorded: {err}");
                    // The new target may be what the store rejected; fall back to the old one.
                    let with_new_target = SyncMapping {
                        target_id: Some(target_id),
                        ..base.clone()
                    };
                    if !self.record_error(with_new_target, attempt_at, message.clone()) {
                        self.record_error(base, attempt_at, message.clone());
                    }
                    return SyncResult::failed(source_id, Some(target_id), message);
                }
                info!(source_id, target_id, %outcome, "[SYNC] Page synced");
                SyncResult::new(source_id, outcome, Some(target_id))
            }
            Err(err) => {
                warn!(source_id, error = %err, "[SYNC][ERROR] Page sync failed");
                self.record_error(base, attempt_at, err.to_string());
                SyncResult::failed(source_id, previous_target, err)
            }
        }
    }

    /// Releases a claimed row as `error`. Returns whether the write landed.
    fn record_error(&self, base: SyncMapping, attempt_at: DateTime<Utc>, message: String) -> bool {
        let row = SyncMapping {
            status: SyncStatus::Error,
            last_attempt_at: Some(attempt_at),
            last_error: Some(message),
            updated_at: Utc::now(),
            ..base
        };
        match self.store.upsert(&row) {
            Ok(_) => true,
            Err(err) => {
                error!(
                    source_id = %row.source_id,
                    target_id = ?row.target_id,
                    error = %err,
                    "[SYNC][ERROR] Could not record failure"
                );
                false
            }
        }
    }

    /// Marks a mapped page `error` after its metadata fetch failed. A row
    /// synced right now, here or elsewhere, is left alone.
    fn record_fetch_failure(&self, source_id: &str, err: &FetchError) {
        let busy_here = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(source_id);
        if busy_here {
            debug!(source_id, "[SYNC] Page is being synced here, not recording fetch failure");
            return;
        }
        let attempt_at = Utc::now();
        match self
            .store
            .claim(source_id, attempt_at, self.config.syncing_ttl())
        {
            Ok(Claim::Acquired { previous }) => {
                let base = previous.unwrap_or_else(|| SyncMapping::new(source_id, attempt_at));
                self.record_error(base, attempt_at, err.to_string());
            }
            Ok(Claim::InFlight(_)) => {
                debug!(source_id, "[SYNC] Page is being synced elsewhere, not recording fetch failure");
            }
            Err(store_err) => {
                error!(source_id, error = %store_err, "[SYNC][ERROR] Could not record fetch failure");
            }
        }
    }

    async fn convert_and_publish(
        &self,
        page: &PageSummary,
        target_id: Option<i64>,
    ) -> Result<(SyncOutcome, i64), SyncError> {
        let markup = self
            .pipeline
            .convert_page(&page.id, self.config.max_depth)
            .await?;
        debug!(source_id = %page.id, bytes = markup.len(), "[SYNC] Page converted");

        if let Some(target_id) = target_id {
            match self
                .publisher
                .update_post(target_id, &page.title, &markup)
                .await
            {
                Ok(()) => return Ok((SyncOutcome::Updated, target_id)),
                Err(UpsertError::NotFound(_)) => {
                    warn!(
                        source_id = %page.id,
                        target_id,
                        "[SYNC] Mapped post is gone from the target, creating a new one"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        let created = self.publisher.create_post(&page.title, &markup).await?;
        Ok((SyncOutcome::Created, created))
    }

    /// Read-only: would [`Self::sync_one`] do any work for this page?
    pub async fn needs_sync(&self, source_id: &str) -> Result<bool, SyncError> {
        let Some(mapping) = self.store.find(source_id)? else {
            return Ok(true);
        };
        if mapping.status != SyncStatus::Synced {
            return Ok(true);
        }
        let page = self.fetcher.fetch_page(source_id).await?;
        Ok(!is_unchanged(&mapping, &page))
    }

    /// Forgets the page ↔ post correlation. The post itself is left alone.
    pub fn unmap(&self, source_id: &str) -> Result<bool, SyncError> {
        let busy_here = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(source_id);
        if busy_here {
            return Err(ConflictError {
                source_id: source_id.to_string(),
            }
            .into());
        }
        unmap(self.store.as_ref(), source_id, self.config.syncing_ttl())
    }
}

/// Deletes the mapping row of `source_id` unless a live sync holds it.
///
/// Usable without an orchestrator, e.g. from a CLI that only opened the store.
pub fn unmap<S>(store: &S, source_id: &str, syncing_ttl: Duration) -> Result<bool, SyncError>
where
    S: MappingStore + ?Sized,
{
    if let Some(row) = store.find(source_id)? {
        if row.is_in_flight(Utc::now(), syncing_ttl) {
            warn!(source_id, "[SYNC] Refusing to unmap a page that is being synced");
            return Err(ConflictError {
                source_id: source_id.to_string(),
            }
            .into());
        }
    }
    let removed = store.delete(source_id)?;
    info!(source_id, removed, "[SYNC] Unmapped page");
    Ok(removed)
}

fn is_unchanged(mapping: &SyncMapping, page: &PageSummary) -> bool {
    mapping.status == SyncStatus::Synced
        && mapping.source_modified_at == Some(page.modified_at)
}

#[async_trait]
impl<F, P, S> PageSyncer for SyncOrchestrator<F, P, S>
where
    F: ContentFetcher,
    P: Publisher,
    S: MappingStore + ?Sized,
{
    async fn sync_page(&self, source_id: &str, options: SyncOptions) -> SyncResult {
        self.sync_one(source_id, options).await
    }
}
