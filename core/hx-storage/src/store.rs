//! Store operations over the shared connection.
//!
//! Sync-imported sessions use the composite id `node_id|original_id` so
//! rows from different peers can never collide. All inserts on uniqueness
//! keys are `INSERT OR IGNORE` so retries and re-imports are no-ops.

use crate::error::{StorageError, StorageResult};
use duckdb::{params, Connection};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

const SYNC_SESSION_SEP: &str = "|";

/// Composite session id for sync imports: `node_id|original_session_id`.
pub fn sync_session_id(node_id: &str, orig_session_id: &str) -> String {
    format!("{node_id}{SYNC_SESSION_SEP}{orig_session_id}")
}

/// A local live event not yet published to a given vault.
#[derive(Clone, Debug)]
pub struct UnpublishedEvent {
    pub event_id: i64,
    pub session_id: String,
    pub seq: i64,
    pub started_at: f64,
    pub ended_at: Option<f64>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i64>,
    pub cwd: String,
    pub cmd: String,
}

/// Session metadata carried inside segments.
#[derive(Clone, Debug)]
pub struct SessionMeta {
    pub session_id: String,
    pub started_at: f64,
    pub ended_at: Option<f64>,
    pub host: String,
    pub tty: Option<String>,
    pub initial_cwd: Option<String>,
}

/// Row for the content-addressed blob table.
#[derive(Clone, Debug)]
pub struct BlobRow {
    pub sha256: String,
    pub storage_path: String,
    pub byte_len: i64,
    pub compression: String,
    pub created_at: f64,
}

/// Row for the artifact metadata table.
#[derive(Clone, Debug)]
pub struct ArtifactRow {
    pub created_at: f64,
    pub kind: Option<String>,
    pub sha256: String,
    pub byte_len: i64,
    pub blob_path: String,
    pub linked_session_id: Option<String>,
    pub linked_event_id: Option<i64>,
    pub summary: Option<String>,
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub(crate) fn connection(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Returns the `cmd_id` for `cmd_text`, interning it if new.
    /// Equal trimmed text always maps to the same id.
    pub fn cmd_id(&self, cmd_text: &str, ts: f64) -> StorageResult<i64> {
        let trimmed = cmd_text.trim();
        let hash_hex = hex::encode(Sha256::digest(trimmed.as_bytes()));
        let ts = if ts == 0.0 { crate::now_ts() } else { ts };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO command_dict (cmd_hash, cmd_text, first_seen_at) VALUES (?, ?, ?)",
            params![hash_hex, trimmed, ts],
        )?;
        let id: i64 = conn.query_row(
            "SELECT cmd_id FROM command_dict WHERE cmd_hash = ?",
            params![hash_hex],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Creates a live session if absent.
    pub fn ensure_session(
        &self,
        session_id: &str,
        host: &str,
        tty: &str,
        initial_cwd: &str,
        started_at: f64,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO sessions (session_id, started_at, host, tty, shell, initial_cwd) VALUES (?, ?, ?, ?, 'zsh', ?)",
            params![session_id, started_at, host, tty, initial_cwd],
        )?;
        Ok(())
    }

    pub fn update_session_ended(&self, session_id: &str, ended_at: f64) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET ended_at = ? WHERE session_id = ?",
            params![ended_at, session_id],
        )?;
        Ok(())
    }

    /// Sets `pinned` for the session, exempting it from retention and
    /// tombstones. Errors if the session does not exist.
    pub fn pin_session(&self, session_id: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE sessions SET pinned = TRUE WHERE session_id = ?",
            params![session_id],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    /// Creates a session row for a sync import if absent.
    /// `session_id` must already be the composite [`sync_session_id`].
    pub fn ensure_sync_session(
        &self,
        session_id: &str,
        host: &str,
        tty: Option<&str>,
        initial_cwd: Option<&str>,
        started_at: f64,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO sessions (session_id, started_at, host, tty, shell, initial_cwd, origin) VALUES (?, ?, ?, ?, 'zsh', ?, 'sync')",
            params![session_id, started_at, host, tty, initial_cwd],
        )?;
        Ok(())
    }

    /// Inserts a live event, maintaining the full-text companion.
    /// `pipe_status` is the per-pipeline-stage exit status list.
    /// Returns false when the (session, seq) row already exists.
    pub fn insert_live_event(
        &self,
        session_id: &str,
        seq: i64,
        started_at: f64,
        ended_at: f64,
        duration_ms: i64,
        exit_code: i64,
        pipe_status: &[i64],
        cwd: &str,
        cmd_id: i64,
        cmd_text: &str,
    ) -> StorageResult<bool> {
        let pipe_json = if pipe_status.is_empty() {
            "[]".to_string()
        } else {
            serde_json::to_string(pipe_status)?
        };
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO events (session_id, seq, started_at, ended_at, duration_ms, exit_code, pipe_status_json, cwd, cmd_id) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![session_id, seq, started_at, ended_at, duration_ms, exit_code, pipe_json, cwd, cmd_id],
        )?;
        if n > 0 {
            let event_id: i64 = conn.query_row(
                "SELECT event_id FROM events WHERE session_id = ? AND seq = ?",
                params![session_id, seq],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO events_fts (event_id, cmd_text, cwd) VALUES (?, ?, ?)",
                params![event_id, cmd_text, cwd],
            )?;
        }
        Ok(n > 0)
    }

    /// Inserts an event from a sync segment. Idempotent on (session, seq).
    pub fn insert_sync_event(
        &self,
        cmd_text: &str,
        started_at: f64,
        ended_at: f64,
        duration_ms: i64,
        exit_code: i64,
        cwd: &str,
        seq: i64,
        session_id: &str,
        cmd_id: i64,
    ) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO events (session_id, seq, started_at, ended_at, duration_ms, exit_code, cwd, cmd_id, origin) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'sync')",
            params![session_id, seq, started_at, ended_at, duration_ms, exit_code, cwd, cmd_id],
        )?;
        if n > 0 {
            let event_id: i64 = conn.query_row(
                "SELECT event_id FROM events WHERE session_id = ? AND seq = ?",
                params![session_id, seq],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO events_fts (event_id, cmd_text, cwd) VALUES (?, ?, ?)",
                params![event_id, cmd_text, cwd],
            )?;
        }
        Ok(n > 0)
    }

    /// Live events not yet published to `vault_id`, oldest first,
    /// ties broken by (session, seq).
    pub fn unpublished_live_events(&self, vault_id: &str) -> StorageResult<Vec<UnpublishedEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.event_id, e.session_id, e.seq, e.started_at, e.ended_at, e.duration_ms, e.exit_code, COALESCE(e.cwd, ''), COALESCE(c.cmd_text, '') \
             FROM events e \
             LEFT JOIN command_dict c ON e.cmd_id = c.cmd_id \
             WHERE e.origin = 'live' \
             AND e.event_id NOT IN (SELECT event_id FROM sync_published_events WHERE vault_id = ?) \
             ORDER BY e.started_at ASC, e.session_id ASC, e.seq ASC",
        )?;
        let events = stmt
            .query_map(params![vault_id], |row| {
                Ok(UnpublishedEvent {
                    event_id: row.get(0)?,
                    session_id: row.get(1)?,
                    seq: row.get(2)?,
                    started_at: row.get(3)?,
                    ended_at: row.get(4)?,
                    duration_ms: row.get(5)?,
                    exit_code: row.get(6)?,
                    cwd: row.get(7)?,
                    cmd: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub fn session_meta(&self, session_id: &str) -> StorageResult<Option<SessionMeta>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT session_id, started_at, ended_at, host, tty, initial_cwd FROM sessions WHERE session_id = ?",
            params![session_id],
            |row| {
                Ok(SessionMeta {
                    session_id: row.get(0)?,
                    started_at: row.get(1)?,
                    ended_at: row.get(2)?,
                    host: row.get(3)?,
                    tty: row.get(4)?,
                    initial_cwd: row.get(5)?,
                })
            },
        );
        match result {
            Ok(meta) => Ok(Some(meta)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Records the given events as published into `segment_id`, in one
    /// transaction. This is the local durability boundary of a push.
    pub fn mark_events_published(
        &self,
        event_ids: &[i64],
        vault_id: &str,
        node_id: &str,
        segment_id: &str,
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO sync_published_events (event_id, vault_id, node_id, segment_id) VALUES (?, ?, ?, ?)",
            )?;
            for id in event_ids {
                stmt.execute(params![id, vault_id, node_id, segment_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Highest manifest sequence seen for (vault, node); 0 when none.
    pub fn manifest_seq(&self, vault_id: &str, node_id: &str) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap();
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(manifest_seq), 0) FROM sync_node_manifests WHERE vault_id = ? AND node_id = ?",
            params![vault_id, node_id],
            |row| row.get(0),
        )?;
        Ok(seq as u64)
    }

    /// Upserts the manifest watermark for (vault, node).
    pub fn set_manifest_seq(
        &self,
        vault_id: &str,
        node_id: &str,
        seq: u64,
        applied_at: f64,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sync_node_manifests (vault_id, node_id, manifest_seq, applied_at) VALUES (?, ?, ?, ?)",
            params![vault_id, node_id, seq as i64, applied_at],
        )?;
        Ok(())
    }

    /// Every segment this node has ever published to the vault.
    pub fn published_segment_ids(&self, vault_id: &str, node_id: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT segment_id FROM sync_published_events WHERE vault_id = ? AND node_id = ? ORDER BY segment_id",
        )?;
        let ids = stmt
            .query_map(params![vault_id, node_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn published_tombstone_ids(
        &self,
        vault_id: &str,
        node_id: &str,
    ) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT tombstone_id FROM sync_published_tombstones WHERE vault_id = ? AND node_id = ? ORDER BY tombstone_id",
        )?;
        let ids = stmt
            .query_map(params![vault_id, node_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn record_published_tombstone(
        &self,
        tombstone_id: &str,
        vault_id: &str,
        node_id: &str,
        created_at: f64,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO sync_published_tombstones (tombstone_id, vault_id, node_id, created_at) VALUES (?, ?, ?, ?)",
            params![tombstone_id, vault_id, node_id, created_at],
        )?;
        Ok(())
    }

    pub fn is_segment_imported(
        &self,
        vault_id: &str,
        node_id: &str,
        segment_id: &str,
    ) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM imported_segments WHERE vault_id = ? AND node_id = ? AND segment_id = ?",
            params![vault_id, node_id, segment_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Marks a segment imported, with its full content sha256 as witness.
    /// This is the LAST step of a segment import.
    pub fn record_imported_segment(
        &self,
        vault_id: &str,
        node_id: &str,
        segment_id: &str,
        segment_hash: &str,
        imported_at: f64,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO imported_segments (vault_id, node_id, segment_id, segment_hash, imported_at) VALUES (?, ?, ?, ?, ?)",
            params![vault_id, node_id, segment_id, segment_hash, imported_at],
        )?;
        Ok(())
    }

    pub fn is_tombstone_applied(&self, vault_id: &str, tombstone_id: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM applied_tombstones WHERE vault_id = ? AND tombstone_id = ?",
            params![vault_id, tombstone_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Inserts a blob row. Returns false when the hash is already present.
    pub fn record_blob(&self, row: &BlobRow) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO blobs (sha256, storage_path, byte_len, compression, created_at) VALUES (?, ?, ?, ?, ?)",
            params![row.sha256, row.storage_path, row.byte_len, row.compression, row.created_at],
        )?;
        Ok(n > 0)
    }

    pub fn record_artifact(&self, row: &ArtifactRow) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO artifacts (created_at, kind, sha256, byte_len, blob_path, linked_session_id, linked_event_id, summary) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                row.created_at,
                row.kind,
                row.sha256,
                row.byte_len,
                row.blob_path,
                row.linked_session_id,
                row.linked_event_id,
                row.summary
            ],
        )?;
        Ok(())
    }

    /// Records an enrolled sync target. Idempotent per vault id.
    pub fn register_vault(
        &self,
        vault_id: &str,
        name: Option<&str>,
        store_type: &str,
        store_path: &str,
        encrypt: bool,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sync_vaults (vault_id, name, store_type, store_path, encrypt) VALUES (?, ?, ?, ?, ?)",
            params![vault_id, name, store_type, store_path, encrypt],
        )?;
        Ok(())
    }

    pub fn vault_ids(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT vault_id FROM sync_vaults ORDER BY vault_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn count_events(&self) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn has_event(&self, session_id: &str, seq: i64) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE session_id = ? AND seq = ?",
            params![session_id, seq],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Parsed pipe-status list for an event; `None` when the event is
    /// absent, empty when the command was not a pipeline.
    pub fn event_pipe_status(&self, session_id: &str, seq: i64) -> StorageResult<Option<Vec<i64>>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT COALESCE(pipe_status_json, '[]') FROM events WHERE session_id = ? AND seq = ?",
            params![session_id, seq],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn event_cmd_text(&self, session_id: &str, seq: i64) -> StorageResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT COALESCE(c.cmd_text, '') FROM events e LEFT JOIN command_dict c ON e.cmd_id = c.cmd_id WHERE e.session_id = ? AND e.seq = ?",
            params![session_id, seq],
            |row| row.get(0),
        );
        match result {
            Ok(text) => Ok(Some(text)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn imported_segment_count(&self, vault_id: &str) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM imported_segments WHERE vault_id = ?",
            params![vault_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn session_pinned(&self, session_id: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let pinned: bool = conn.query_row(
            "SELECT pinned FROM sessions WHERE session_id = ?",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(pinned)
    }
}
