//! Sync mapping store: which source page became which target post, and how
//! the last sync of it went.
//!
//! # Invariants
//! - Exactly one row per `source_id`, and per non-null `target_id`.
//! - `upsert` is a single atomic write keyed by `source_id`.
//! - `claim` is an atomic check-and-set of the `syncing` lock; a `syncing`
//!   row whose `last_attempt_at` is older than the caller's TTL counts as
//!   abandoned and may be reclaimed.
//! - The sync path never deletes rows; only [`MappingStore::delete`] does.

pub mod migrations;
mod sqlite;

pub use sqlite::SqliteMappingStore;

use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default and maximum page sizes for [`MappingStore::list`].
pub const LIST_DEFAULT_PAGE_SIZE: usize = 50;
pub const LIST_MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NeverSynced,
    Synced,
    NeedsUpdate,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::NeverSynced => "never_synced",
            SyncStatus::Synced => "synced",
            SyncStatus::NeedsUpdate => "needs_update",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sync status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for SyncStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "never_synced" => SyncStatus::NeverSynced,
            "synced" => SyncStatus::Synced,
            "needs_update" => SyncStatus::NeedsUpdate,
            "syncing" => SyncStatus::Syncing,
            "error" => SyncStatus::Error,
            other => return Err(ParseStatusError(other.to_string())),
        })
    }
}

impl ToSql for SyncStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for SyncStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMapping {
    pub source_id: String,
    /// `None` until the first successful write to the target.
    pub target_id: Option<i64>,
    pub source_title: String,
    pub source_modified_at: Option<DateTime<Utc>>,
    pub target_modified_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncMapping {
    pub fn new(source_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: None,
            source_title: String::new(),
            source_modified_at: None,
            target_modified_at: None,
            status: SyncStatus::NeverSynced,
            last_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when a sync holding this row is still considered live at `now`.
    pub fn is_in_flight(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        if self.status != SyncStatus::Syncing {
            return false;
        }
        match self.last_attempt_at {
            // A future timestamp (clock skew) is treated as live.
            Some(at) => now
                .signed_duration_since(at)
                .to_std()
                .map_or(true, |age| age < stale_after),
            None => false,
        }
    }
}

/// Result of trying to take the per-page sync lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The row is now `syncing` and owned by the caller.
    Acquired { previous: Option<SyncMapping> },
    /// Another live sync holds the row.
    InFlight(SyncMapping),
}

/// Durable page ↔ post correlation.
pub trait MappingStore: Send + Sync {
    fn find(&self, source_id: &str) -> StoreResult<Option<SyncMapping>>;

    fn find_by_target(&self, target_id: i64) -> StoreResult<Option<SyncMapping>>;

    /// Inserts or updates the row keyed by `mapping.source_id`; returns the stored row.
    fn upsert(&self, mapping: &SyncMapping) -> StoreResult<SyncMapping>;

    /// One page (1-based) of rows, optionally filtered by status, ordered by `source_id`.
    fn list(
        &self,
        filter: Option<SyncStatus>,
        page: usize,
        page_size: usize,
    ) -> StoreResult<Vec<SyncMapping>>;

    fn count(&self, filter: Option<SyncStatus>) -> StoreResult<usize>;

    /// Atomically marks the row `syncing` unless a live sync already holds it.
    fn claim(
        &self,
        source_id: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> StoreResult<Claim>;

    /// Removes the row; returns whether one existed.
    fn delete(&self, source_id: &str) -> StoreResult<bool>;
}
