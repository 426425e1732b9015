//! Versioned schema for the mapping store.
//!
//! The database records the last step it has run in `PRAGMA user_version`.
//! Step numbers start at 1 and increase by one per entry in [`SCHEMA`].

use crate::error::{StoreError, StoreResult};
use rusqlite::{Connection, Transaction};

/// DDL per schema step; entry `n` brings the database to version `n + 1`.
const SCHEMA: &[&str] = &[include_str!("0001_sync_mappings.sql")];

/// Schema version this build writes.
pub fn schema_version() -> u32 {
    SCHEMA.len() as u32
}

/// Brings `conn` up to [`schema_version`]. A database written by a newer
/// build is refused rather than touched.
pub fn migrate(conn: &mut Connection) -> StoreResult<()> {
    let found = stored_version(conn)?;
    let target = schema_version();
    if found > target {
        return Err(StoreError::UnsupportedSchemaVersion {
            db_version: found,
            latest_supported: target,
        });
    }

    let pending: Vec<(u32, &str)> = (found + 1..=target)
        .zip(SCHEMA.iter().skip(found as usize).copied())
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, ddl) in pending {
        run_step(&tx, version, ddl)?;
    }
    tx.commit()?;
    tracing::info!(from = found, to = target, "[STORE] Schema upgraded");
    Ok(())
}

fn run_step(tx: &Transaction<'_>, version: u32, ddl: &str) -> StoreResult<()> {
    tracing::debug!(version, "[STORE] Running schema step");
    tx.execute_batch(ddl)?;
    tx.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn stored_version(conn: &Connection) -> StoreResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
