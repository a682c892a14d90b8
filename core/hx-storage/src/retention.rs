//! Retention sweeps: age-based event pruning and blob garbage collection.
//!
//! Both sweeps respect pinning. Event pruning alone does not protect
//! against resurrection by re-sync; callers that want a deletion to hold
//! across the vault publish a tombstone first (see the sync publisher).

use crate::error::StorageResult;
use crate::store::Store;
use crate::tombstones::delete_events_batched;
use chrono::{Months, Utc};
use duckdb::params;
use std::path::Path;
use tracing::{debug, info};

/// Deletes events older than `retention_months` whose session is not
/// pinned. Returns the number of events deleted.
pub fn prune_events(store: &Store, retention_months: u32) -> StorageResult<usize> {
    if retention_months == 0 {
        return Ok(0);
    }
    let cutoff = Utc::now()
        .checked_sub_months(Months::new(retention_months))
        .map(|t| t.timestamp() as f64)
        .unwrap_or(0.0);

    let mut conn = store.connection().lock().unwrap();
    let event_ids: Vec<i64> = {
        let mut stmt = conn.prepare(
            "SELECT e.event_id FROM events e \
             JOIN sessions s ON s.session_id = e.session_id \
             WHERE e.started_at < ? AND s.pinned = FALSE",
        )?;
        stmt.query_map(params![cutoff], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?
    };
    if event_ids.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    delete_events_batched(&tx, &event_ids)?;
    tx.commit()?;

    info!(deleted = event_ids.len(), "pruned events past retention");
    Ok(event_ids.len())
}

/// Blob garbage collection:
/// 1. drop stale artifacts not linked to a pinned session,
/// 2. delete blobs past `retention_blobs_days` with no remaining artifact
///    reference (file first, then row),
/// 3. evict oldest blobs not referenced by pinned sessions until the
///    total is under `disk_cap_gb`.
///
/// Returns the number of blobs removed.
pub fn prune_blobs(
    store: &Store,
    blob_dir: &Path,
    retention_blobs_days: u32,
    disk_cap_gb: f64,
) -> StorageResult<usize> {
    if retention_blobs_days == 0 {
        return Ok(0);
    }
    let cutoff = (Utc::now() - chrono::Duration::days(retention_blobs_days as i64)).timestamp() as f64;
    let conn = store.connection().lock().unwrap();

    conn.execute(
        "DELETE FROM artifacts WHERE created_at < ? AND ( \
            linked_session_id IS NULL \
            OR linked_session_id NOT IN (SELECT session_id FROM sessions WHERE pinned = TRUE) \
         )",
        params![cutoff],
    )?;

    let stale: Vec<(String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT b.sha256, b.storage_path FROM blobs b \
             WHERE b.created_at < ? AND b.sha256 NOT IN (SELECT sha256 FROM artifacts)",
        )?;
        stmt.query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut deleted = 0usize;
    for (sha256, path) in &stale {
        remove_blob_file(blob_dir, path);
        deleted += conn.execute("DELETE FROM blobs WHERE sha256 = ?", params![sha256])?;
    }

    // Enforce the disk cap by oldest-first eviction.
    if disk_cap_gb > 0.0 {
        let cap_bytes = (disk_cap_gb * 1e9) as i64;
        loop {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(byte_len), 0) FROM blobs",
                [],
                |row| row.get(0),
            )?;
            if total <= cap_bytes {
                break;
            }
            let oldest = conn.query_row(
                "SELECT b.sha256, b.storage_path FROM blobs b \
                 WHERE b.sha256 NOT IN ( \
                    SELECT a.sha256 FROM artifacts a \
                    JOIN sessions s ON s.session_id = a.linked_session_id \
                    WHERE s.pinned = TRUE \
                 ) \
                 ORDER BY b.created_at ASC LIMIT 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            );
            let (sha256, path) = match oldest {
                Ok(v) => v,
                Err(duckdb::Error::QueryReturnedNoRows) => break,
                Err(e) => return Err(e.into()),
            };
            remove_blob_file(blob_dir, &path);
            conn.execute("DELETE FROM artifacts WHERE sha256 = ?", params![sha256])?;
            conn.execute("DELETE FROM blobs WHERE sha256 = ?", params![sha256])?;
            deleted += 1;
        }
    }

    debug!(deleted, "blob GC finished");
    Ok(deleted)
}

fn remove_blob_file(blob_dir: &Path, storage_path: &str) {
    let path = Path::new(storage_path);
    let full = if path.is_absolute() {
        path.to_path_buf()
    } else {
        blob_dir.join(path)
    };
    // Missing file is fine; the row is the source of truth
    let _ = std::fs::remove_file(full);
}
