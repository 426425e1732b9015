//! SQLite-backed [`MappingStore`].
//!
//! One connection behind a mutex; every call is a short critical section.
//! Connections are opened with migrations fully applied.

use super::migrations::migrate;
use super::{Claim, MappingStore, SyncMapping, SyncStatus, LIST_DEFAULT_PAGE_SIZE, LIST_MAX_PAGE_SIZE};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const COLUMNS: &str = "source_id, target_id, source_title, source_modified_at, target_modified_at, \
                       status, last_attempt_at, last_error, created_at, updated_at";

pub struct SqliteMappingStore {
    conn: Mutex<Connection>,
}

impl SqliteMappingStore {
    /// Opens (creating if needed) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let started_at = Instant::now();
        let conn = Connection::open(path).map_err(|err| {
            error!(path = %path.display(), error = %err, "[STORE] Failed to open database");
            StoreError::from(err)
        })?;
        let store = Self::bootstrap(conn)?;
        info!(
            path = %path.display(),
            duration_ms = started_at.elapsed().as_millis() as u64,
            "[STORE] Mapping store opened"
        );
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self::bootstrap(Connection::open_in_memory()?)?;
        debug!("[STORE] In-memory mapping store opened");
        Ok(store)
    }

    fn bootstrap(mut conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn row_to_mapping(row: &Row<'_>) -> rusqlite::Result<SyncMapping> {
    Ok(SyncMapping {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        source_title: row.get(2)?,
        source_modified_at: row.get(3)?,
        target_modified_at: row.get(4)?,
        status: row.get(5)?,
        last_attempt_at: row.get(6)?,
        last_error: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn find_in(conn: &Connection, source_id: &str) -> StoreResult<Option<SyncMapping>> {
    let sql = format!("SELECT {COLUMNS} FROM sync_mappings WHERE source_id = ?1");
    Ok(conn
        .query_row(&sql, params![source_id], row_to_mapping)
        .optional()?)
}

impl MappingStore for SqliteMappingStore {
    fn find(&self, source_id: &str) -> StoreResult<Option<SyncMapping>> {
        let conn = self.lock()?;
        find_in(&conn, source_id)
    }

    fn find_by_target(&self, target_id: i64) -> StoreResult<Option<SyncMapping>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {COLUMNS} FROM sync_mappings WHERE target_id = ?1");
        Ok(conn
            .query_row(&sql, params![target_id], row_to_mapping)
            .optional()?)
    }

    fn upsert(&self, mapping: &SyncMapping) -> StoreResult<SyncMapping> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_mappings (
                 source_id, target_id, source_title, source_modified_at, target_modified_at,
                 status, last_attempt_at, last_error, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(source_id) DO UPDATE SET
                 target_id = excluded.target_id,
                 source_title = excluded.source_title,
                 source_modified_at = excluded.source_modified_at,
                 target_modified_at = excluded.target_modified_at,
                 status = excluded.status,
                 last_attempt_at = excluded.last_attempt_at,
                 last_error = excluded.last_error,
                 updated_at = excluded.updated_at",
            params![
                mapping.source_id,
                mapping.target_id,
                mapping.source_title,
                mapping.source_modified_at,
                mapping.target_modified_at,
                mapping.status,
                mapping.last_attempt_at,
                mapping.last_error,
                mapping.created_at,
                mapping.updated_at,
            ],
        )?;
        find_in(&conn, &mapping.source_id)?.ok_or_else(|| {
            StoreError::Corrupt(format!("row {} vanished after upsert", mapping.source_id))
        })
    }

    fn list(
        &self,
        filter: Option<SyncStatus>,
        page: usize,
        page_size: usize,
    ) -> StoreResult<Vec<SyncMapping>> {
        let page_size = match page_size {
            0 => LIST_DEFAULT_PAGE_SIZE,
            n => n.min(LIST_MAX_PAGE_SIZE),
        };
        let offset = page.max(1).saturating_sub(1).saturating_mul(page_size);

        let conn = self.lock()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM sync_mappings
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY source_id
             LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![filter, page_size as i64, offset as i64],
                row_to_mapping,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn count(&self, filter: Option<SyncStatus>) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_mappings WHERE (?1 IS NULL OR status = ?1)",
            params![filter],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative row count {count}")))
    }

    fn claim(
        &self,
        source_id: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> StoreResult<Claim> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous = find_in(&tx, source_id)?;
        if let Some(row) = &previous {
            if row.is_in_flight(now, stale_after) {
                debug!(source_id, "[STORE] Claim refused, sync in flight");
                return Ok(Claim::InFlight(row.clone()));
            }
            if row.status == SyncStatus::Syncing {
                info!(
                    source_id,
                    last_attempt_at = ?row.last_attempt_at,
                    "[STORE] Reclaiming abandoned syncing row"
                );
            }
        }

        match &previous {
            Some(_) => {
                tx.execute(
                    "UPDATE sync_mappings
                     SET status = ?2, last_attempt_at = ?3, updated_at = ?3
                     WHERE source_id = ?1",
                    params![source_id, SyncStatus::Syncing, now],
                )?;
            }
            None => {
                let mut fresh = SyncMapping::new(source_id, now);
                fresh.status = SyncStatus::Syncing;
                fresh.last_attempt_at = Some(now);
                tx.execute(
                    "INSERT INTO sync_mappings (source_id, status, last_attempt_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        fresh.source_id,
                        fresh.status,
                        fresh.last_attempt_at,
                        fresh.created_at,
                        fresh.updated_at,
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(Claim::Acquired { previous })
    }

    fn delete(&self, source_id: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM sync_mappings WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(removed > 0)
    }
}
