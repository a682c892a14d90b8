//! Tombstone application engine.
//!
//! A tombstone deletes events whose `started_at` falls inside an
//! inclusive time window, optionally scoped to one node's sessions.
//! Pinned sessions are exempt regardless of the tombstone's origin.

use crate::error::StorageResult;
use crate::store::Store;
use duckdb::{params, params_from_iter, Transaction};
use tracing::debug;

const DELETE_BATCH: usize = 500;

/// An applied (or to-apply) deletion window.
#[derive(Clone, Debug)]
pub struct TombstoneWindow {
    /// When set, only events from this node's sessions are affected.
    pub node_id: Option<String>,
    pub start_ts: f64,
    pub end_ts: f64,
}

impl TombstoneWindow {
    /// Whether an event from `node_id` starting at `started_at` is masked.
    pub fn covers(&self, node_id: &str, started_at: f64) -> bool {
        if let Some(scope) = &self.node_id {
            if scope != node_id {
                return false;
            }
        }
        started_at >= self.start_ts && started_at <= self.end_ts
    }
}

/// Loads every tombstone window already applied for the vault, for
/// pre-insert masking during segment import.
pub fn load_applied_tombstones(store: &Store, vault_id: &str) -> StorageResult<Vec<TombstoneWindow>> {
    let conn = store.connection().lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT node_id, start_ts, end_ts FROM applied_tombstones WHERE vault_id = ?",
    )?;
    let windows = stmt
        .query_map(params![vault_id], |row| {
            Ok(TombstoneWindow {
                node_id: row.get(0)?,
                start_ts: row.get(1)?,
                end_ts: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(windows)
}

/// Applies a tombstone: deletes matching unpinned events (and their
/// full-text rows) in one transaction, then records the tombstone as
/// applied. Re-applying a recorded tombstone is a no-op at the caller
/// (check [`Store::is_tombstone_applied`] first).
///
/// `local_node_id` is this device's identity. Sync-imported sessions are
/// matched by their `node|` prefix; when the scope names this device,
/// the device's own non-composite sessions are covered too.
///
/// Returns the number of events deleted.
pub fn apply_tombstone(
    store: &Store,
    vault_id: &str,
    tombstone_id: &str,
    window: &TombstoneWindow,
    applied_at: f64,
    local_node_id: &str,
) -> StorageResult<usize> {
    let mut conn = store.connection().lock().unwrap();

    let event_ids: Vec<i64> = {
        let (sql, like) = match &window.node_id {
            Some(node) if node == local_node_id => (
                "SELECT e.event_id FROM events e \
                 JOIN sessions s ON s.session_id = e.session_id \
                 WHERE e.started_at >= ? AND e.started_at <= ? AND s.pinned = FALSE \
                 AND (e.session_id LIKE ? OR e.session_id NOT LIKE '%|%')",
                Some(format!("{node}|%")),
            ),
            Some(node) => (
                "SELECT e.event_id FROM events e \
                 JOIN sessions s ON s.session_id = e.session_id \
                 WHERE e.started_at >= ? AND e.started_at <= ? AND s.pinned = FALSE \
                 AND e.session_id LIKE ?",
                Some(format!("{node}|%")),
            ),
            None => (
                "SELECT e.event_id FROM events e \
                 JOIN sessions s ON s.session_id = e.session_id \
                 WHERE e.started_at >= ? AND e.started_at <= ? AND s.pinned = FALSE",
                None,
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows: Vec<Result<i64, duckdb::Error>> = match like {
            Some(pattern) => stmt
                .query_map(params![window.start_ts, window.end_ts, pattern], |row| {
                    row.get(0)
                })?
                .collect(),
            None => stmt
                .query_map(params![window.start_ts, window.end_ts], |row| row.get(0))?
                .collect(),
        };
        rows.into_iter().collect::<Result<Vec<_>, _>>()?
    };

    let tx = conn.transaction()?;
    delete_events_batched(&tx, &event_ids)?;
    tx.execute(
        "INSERT OR IGNORE INTO applied_tombstones (tombstone_id, vault_id, applied_at, node_id, start_ts, end_ts) VALUES (?, ?, ?, ?, ?, ?)",
        params![
            tombstone_id,
            vault_id,
            applied_at,
            window.node_id,
            window.start_ts,
            window.end_ts
        ],
    )?;
    tx.commit()?;

    debug!(
        tombstone_id,
        vault_id,
        deleted = event_ids.len(),
        "applied tombstone"
    );
    Ok(event_ids.len())
}

/// Deletes event rows and their full-text companions in bounded batches.
pub(crate) fn delete_events_batched(tx: &Transaction<'_>, event_ids: &[i64]) -> StorageResult<()> {
    for chunk in event_ids.chunks(DELETE_BATCH) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        tx.execute(
            &format!("DELETE FROM events_fts WHERE event_id IN ({placeholders})"),
            params_from_iter(chunk.iter().copied()),
        )?;
        tx.execute(
            &format!("DELETE FROM events WHERE event_id IN ({placeholders})"),
            params_from_iter(chunk.iter().copied()),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::store::sync_session_id;

    fn seeded_store() -> Store {
        let store = Store::new(open_in_memory().unwrap());
        let sid = sync_session_id("nodeA", "s1");
        store.ensure_sync_session(&sid, "host", None, None, 5.0).unwrap();
        let cmd = store.cmd_id("ls", 5.0).unwrap();
        for (seq, ts) in [(1, 10.0), (2, 20.0), (3, 30.0)] {
            store
                .insert_sync_event("ls", ts, ts + 1.0, 1000, 0, "", seq, &sid, cmd)
                .unwrap();
        }
        store
    }

    #[test]
    fn window_delete_respects_bounds() {
        let store = seeded_store();
        let window = TombstoneWindow {
            node_id: None,
            start_ts: 5.0,
            end_ts: 25.0,
        };
        let deleted = apply_tombstone(&store, "v", "t1", &window, 100.0, "localnode").unwrap();
        assert_eq!(deleted, 2);
        assert!(!store.has_event("nodeA|s1", 1).unwrap());
        assert!(!store.has_event("nodeA|s1", 2).unwrap());
        assert!(store.has_event("nodeA|s1", 3).unwrap());
        assert!(store.is_tombstone_applied("v", "t1").unwrap());
    }

    #[test]
    fn pinned_session_is_exempt() {
        let store = seeded_store();
        store.pin_session("nodeA|s1").unwrap();
        let window = TombstoneWindow {
            node_id: None,
            start_ts: 0.0,
            end_ts: 100.0,
        };
        let deleted = apply_tombstone(&store, "v", "t1", &window, 100.0, "localnode").unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(store.count_events().unwrap(), 3);
    }

    #[test]
    fn node_scope_only_matches_that_node() {
        let store = seeded_store();
        let other = sync_session_id("nodeB", "s9");
        store.ensure_sync_session(&other, "h", None, None, 5.0).unwrap();
        let cmd = store.cmd_id("pwd", 5.0).unwrap();
        store
            .insert_sync_event("pwd", 15.0, 16.0, 1000, 0, "", 1, &other, cmd)
            .unwrap();

        let window = TombstoneWindow {
            node_id: Some("nodeB".to_string()),
            start_ts: 0.0,
            end_ts: 100.0,
        };
        apply_tombstone(&store, "v", "t1", &window, 100.0, "localnode").unwrap();

        // nodeA events share timestamps but survive
        assert!(store.has_event("nodeA|s1", 1).unwrap());
        assert!(!store.has_event("nodeB|s9", 1).unwrap());
    }

    #[test]
    fn scope_naming_local_node_covers_raw_sessions() {
        let store = seeded_store();
        // The device's own live session uses a raw (non-composite) id.
        store.ensure_session("live1", "h", "t", "/", 5.0).unwrap();
        let cmd = store.cmd_id("make", 5.0).unwrap();
        store
            .insert_live_event("live1", 1, 15.0, 16.0, 1000, 0, &[], "/", cmd, "make")
            .unwrap();

        let window = TombstoneWindow {
            node_id: Some("localnode".to_string()),
            start_ts: 0.0,
            end_ts: 100.0,
        };
        apply_tombstone(&store, "v", "t1", &window, 100.0, "localnode").unwrap();

        // Local raw session deleted; nodeA composite sessions untouched.
        assert!(!store.has_event("live1", 1).unwrap());
        assert!(store.has_event("nodeA|s1", 1).unwrap());
    }

    #[test]
    fn covers_checks_scope_and_interval() {
        let w = TombstoneWindow {
            node_id: Some("nodeA".to_string()),
            start_ts: 10.0,
            end_ts: 20.0,
        };
        assert!(w.covers("nodeA", 10.0));
        assert!(w.covers("nodeA", 20.0));
        assert!(!w.covers("nodeA", 20.1));
        assert!(!w.covers("nodeB", 15.0));

        let unscoped = TombstoneWindow {
            node_id: None,
            start_ts: 10.0,
            end_ts: 20.0,
        };
        assert!(unscoped.covers("anything", 15.0));
    }
}
