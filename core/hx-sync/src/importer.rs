//! Importer: manifest-driven pull and the degraded prefix-scan mode.
//!
//! A pull lists peer manifests once, skips anything at or below the
//! local watermark, then fetches exactly the segments and tombstones the
//! newer manifests reference. Every per-object failure is counted and
//! recorded; one corrupt peer never blocks another peer's data. Only
//! database failures abort a pull.
//!
//! Tombstones are applied after their manifest's segments, and the
//! already-applied set masks events at insert time, so a re-synced
//! segment can never resurrect a deleted event.

use crate::codec::{decode_object, decrypt_body, open_manifest, parse_segment_payload,
    parse_tombstone_payload};
use crate::error::{SyncError, SyncResult};
use crate::limits::{
    check_manifest_size, check_segment_size, check_tombstone_size, validate_manifest, PullLimiter,
    MAX_OBJECTS_PER_PULL,
};
use crate::object::ObjectKind;
use crate::store::{
    manifests_prefix, objects_prefix, segment_key, tombstone_key, ObjectStore, BLOB_EXT,
    MANIFEST_EXT, SEGMENT_EXT, TOMBSTONE_EXT,
};
use crate::validation::{validate_identifier, IdKind};
use hx_storage::{
    apply_tombstone, load_applied_tombstones, now_ts, sync_session_id, BlobRow, Store,
    TombstoneWindow,
};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Per-category counters for one pull. The pull itself succeeds even
/// with a non-empty error list; the caller decides whether to surface.
#[derive(Debug, Default)]
pub struct PullResult {
    pub manifests_downloaded: u32,
    pub manifests_skipped: u32,
    pub segments_imported: u32,
    pub segments_skipped: u32,
    pub segments_invalid: u32,
    pub segments_unauth: u32,
    pub tombstones_applied: u32,
    pub tombstones_skipped: u32,
    pub tombstones_invalid: u32,
    pub blobs_imported: u32,
    pub blobs_skipped: u32,
    pub blobs_invalid: u32,
    pub blobs_hash_mismatch: u32,
    pub partials_skipped: u32,
    /// List calls issued, by object-type prefix (for efficiency checks).
    pub list_calls: HashMap<String, u32>,
    pub get_calls: u32,
    pub errors: Vec<String>,
}

impl PullResult {
    /// Records a per-object failure, or propagates it when fatal.
    fn record(&mut self, context: &str, err: SyncError) -> SyncResult<()> {
        if matches!(err, SyncError::Database(_)) {
            return Err(err);
        }
        self.errors.push(format!("{context}: {err}"));
        Ok(())
    }
}

/// Manifest-driven pull from the vault store.
pub async fn pull(
    db: &Store,
    store: &dyn ObjectStore,
    vault_id: &str,
    node_id: &str,
    master: Option<&[u8; 32]>,
    encrypt: bool,
) -> SyncResult<PullResult> {
    validate_identifier(vault_id, IdKind::Vault)?;
    validate_identifier(node_id, IdKind::Node)?;
    if encrypt && master.is_none() {
        return Err(SyncError::Config(format!(
            "vault {vault_id} has encryption enabled but no master key"
        )));
    }

    let mut res = PullResult::default();
    let mut limiter = PullLimiter::new(MAX_OBJECTS_PER_PULL);

    let prefix = manifests_prefix(vault_id)?;
    *res.list_calls.entry("manifests".to_string()).or_default() += 1;
    let manifest_keys = match store.list(&prefix).await {
        Ok(keys) => keys,
        Err(e) => {
            res.record("list manifests", e)?;
            return Ok(res);
        }
    };

    for manifest_key in manifest_keys {
        let Some(remote_node) = manifest_basename(&manifest_key) else {
            continue;
        };
        if remote_node == node_id {
            res.manifests_skipped += 1;
            continue;
        }
        if let Err(e) = validate_identifier(&remote_node, IdKind::Node) {
            res.manifests_skipped += 1;
            res.record(&format!("manifest {remote_node}"), e)?;
            continue;
        }

        res.get_calls += 1;
        let raw = match store.get(&manifest_key).await {
            Ok(raw) => raw,
            Err(e) => {
                res.record(&format!("get manifest {remote_node}"), e)?;
                continue;
            }
        };
        if let Err(e) = check_manifest_size(raw.len()) {
            res.manifests_skipped += 1;
            res.record(&format!("manifest {remote_node}"), e)?;
            continue;
        }

        let manifest = match open_manifest(&raw, master) {
            Ok(m) => m,
            Err(e) => {
                res.manifests_skipped += 1;
                res.record(&format!("decode manifest {remote_node}"), e)?;
                continue;
            }
        };
        if manifest.vault_id != vault_id {
            res.manifests_skipped += 1;
            res.record(
                &format!("manifest {remote_node}"),
                SyncError::VaultMismatch {
                    expected: vault_id.to_string(),
                    actual: manifest.vault_id.clone(),
                },
            )?;
            continue;
        }
        if let Err(e) = validate_manifest(&manifest) {
            res.manifests_skipped += 1;
            res.record(&format!("manifest {remote_node}"), e)?;
            continue;
        }

        let watermark = db.manifest_seq(vault_id, &remote_node)?;
        if manifest.manifest_seq <= watermark {
            res.manifests_skipped += 1;
            continue;
        }
        res.manifests_downloaded += 1;
        debug!(
            vault_id,
            remote_node = %remote_node,
            seq = manifest.manifest_seq,
            watermark,
            "ingesting newer manifest"
        );

        // Segments first, then this manifest's tombstones, so a
        // tombstone post-dating a segment still wins.
        for seg in &manifest.segments {
            if let Err(e) = limiter.admit() {
                res.record("segment budget", e)?;
                break;
            }
            if db.is_segment_imported(vault_id, &remote_node, &seg.segment_id)? {
                res.segments_skipped += 1;
                continue;
            }
            if let Err(e) =
                import_segment(db, store, vault_id, &remote_node, &seg.segment_id, master, &mut res)
                    .await
            {
                res.record(&format!("segment {}", seg.segment_id), e)?;
            }
        }

        for tomb in &manifest.tombstones {
            if let Err(e) = limiter.admit() {
                res.record("tombstone budget", e)?;
                break;
            }
            if db.is_tombstone_applied(vault_id, &tomb.tombstone_id)? {
                res.tombstones_skipped += 1;
                continue;
            }
            if let Err(e) =
                import_tombstone(db, store, vault_id, &tomb.tombstone_id, node_id, master, &mut res)
                    .await
            {
                res.record(&format!("tombstone {}", tomb.tombstone_id), e)?;
            }
        }

        db.set_manifest_seq(vault_id, &remote_node, manifest.manifest_seq, now_ts())?;
    }

    info!(
        vault_id,
        manifests = res.manifests_downloaded,
        segments = res.segments_imported,
        tombstones = res.tombstones_applied,
        errors = res.errors.len(),
        "pull finished"
    );
    Ok(res)
}

/// Degraded mode: scan the object prefixes directly instead of reading
/// manifests. Used when a peer's manifest is absent; also the only path
/// that replicates blobs, which are content-addressed and never listed
/// in manifests.
pub async fn scan_import(
    db: &Store,
    store: &dyn ObjectStore,
    blob_dir: &Path,
    vault_id: &str,
    node_id: &str,
    master: Option<&[u8; 32]>,
    encrypt: bool,
) -> SyncResult<PullResult> {
    validate_identifier(vault_id, IdKind::Vault)?;
    validate_identifier(node_id, IdKind::Node)?;
    if encrypt && master.is_none() {
        return Err(SyncError::Config(format!(
            "vault {vault_id} has encryption enabled but no master key"
        )));
    }

    let mut res = PullResult::default();
    let mut limiter = PullLimiter::new(MAX_OBJECTS_PER_PULL);

    let mut listed = HashMap::new();
    for kind_dir in ["segments", "tombstones", "blobs"] {
        let prefix = objects_prefix(vault_id, kind_dir)?;
        *res.list_calls.entry(kind_dir.to_string()).or_default() += 1;
        let keys = match store.list(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                res.record(&format!("list {kind_dir}"), e)?;
                Vec::new()
            }
        };
        listed.insert(kind_dir, filter_importable(keys, &mut res));
    }

    // Tombstones first so segment imports see the full masked set.
    for key in &listed["tombstones"] {
        if let Err(e) = limiter.admit() {
            res.record("tombstone budget", e)?;
            break;
        }
        let Some(tombstone_id) = key_basename(key, TOMBSTONE_EXT) else {
            continue;
        };
        if db.is_tombstone_applied(vault_id, &tombstone_id)? {
            res.tombstones_skipped += 1;
            continue;
        }
        if let Err(e) =
            import_tombstone(db, store, vault_id, &tombstone_id, node_id, master, &mut res).await
        {
            res.record(&format!("tombstone {tombstone_id}"), e)?;
        }
    }

    let own_prefix = format!("/{node_id}/");
    for key in &listed["segments"] {
        if let Err(e) = limiter.admit() {
            res.record("segment budget", e)?;
            break;
        }
        // Own segments would re-import as composite sessions; skip them.
        if key.contains(&own_prefix) {
            res.segments_skipped += 1;
            continue;
        }
        let Some((remote_node, segment_id)) = segment_key_parts(key) else {
            res.errors.push(format!("unparseable segment key {key}"));
            continue;
        };
        if db.is_segment_imported(vault_id, &remote_node, &segment_id)? {
            res.segments_skipped += 1;
            continue;
        }
        if let Err(e) =
            import_segment(db, store, vault_id, &remote_node, &segment_id, master, &mut res).await
        {
            res.record(&format!("segment {segment_id}"), e)?;
        }
    }

    for key in &listed["blobs"] {
        if let Err(e) = limiter.admit() {
            res.record("blob budget", e)?;
            break;
        }
        if let Err(e) = import_blob(db, store, blob_dir, key, vault_id, master, &mut res).await {
            res.record(&format!("blob {key}"), e)?;
        }
    }

    info!(
        vault_id,
        segments = res.segments_imported,
        tombstones = res.tombstones_applied,
        blobs = res.blobs_imported,
        errors = res.errors.len(),
        "scan import finished"
    );
    Ok(res)
}

/// Drops staging leftovers and unknown file types before import.
fn filter_importable(keys: Vec<String>, res: &mut PullResult) -> Vec<String> {
    let mut filtered = Vec::with_capacity(keys.len());
    for key in keys {
        if key.contains("tmp/") || key.ends_with(".partial") {
            res.partials_skipped += 1;
            continue;
        }
        if !(key.ends_with(SEGMENT_EXT)
            || key.ends_with(BLOB_EXT)
            || key.ends_with(TOMBSTONE_EXT))
        {
            res.errors.push(format!("ignored unknown object {key}"));
            continue;
        }
        filtered.push(key);
    }
    filtered
}

async fn import_segment(
    db: &Store,
    store: &dyn ObjectStore,
    vault_id: &str,
    remote_node: &str,
    segment_id: &str,
    master: Option<&[u8; 32]>,
    res: &mut PullResult,
) -> SyncResult<()> {
    let key = segment_key(vault_id, remote_node, segment_id)?;
    res.get_calls += 1;
    let raw = store.get(&key).await?;
    check_segment_size(raw.len())?;

    let decoded = match decode_object(&raw) {
        Ok(d) => d,
        Err(e) => {
            res.segments_invalid += 1;
            return Err(e);
        }
    };
    if decoded.header.object_type != ObjectKind::Segment {
        res.segments_invalid += 1;
        return Err(SyncError::PayloadInvalid(format!(
            "expected segment, got {:?}",
            decoded.header.object_type
        )));
    }
    if decoded.header.vault_id != vault_id {
        res.segments_invalid += 1;
        return Err(SyncError::VaultMismatch {
            expected: vault_id.to_string(),
            actual: decoded.header.vault_id.clone(),
        });
    }
    let header_node = decoded.header.node_id.as_deref().unwrap_or_default();
    let header_segment = decoded.header.segment_id.as_deref().unwrap_or_default();
    if header_node != remote_node || header_segment != segment_id {
        res.segments_invalid += 1;
        return Err(SyncError::PayloadInvalid(format!(
            "segment header names {header_node}/{header_segment}, key names {remote_node}/{segment_id}"
        )));
    }

    let plain = match decrypt_body(&decoded, master) {
        Ok(p) => p,
        Err(SyncError::Unauthenticated) => {
            res.segments_unauth += 1;
            return Err(SyncError::Unauthenticated);
        }
        Err(e) => {
            res.segments_invalid += 1;
            return Err(e);
        }
    };
    let payload = match parse_segment_payload(&plain) {
        Ok(p) => p,
        Err(e) => {
            res.segments_invalid += 1;
            return Err(e);
        }
    };

    // Pre-insert enforcement: events covered by an applied tombstone are
    // dropped rather than resurrected.
    let tombstones = load_applied_tombstones(db, vault_id)?;

    let mut ensured: HashSet<String> = HashSet::new();
    for session in &payload.sessions {
        let sid = sync_session_id(remote_node, &session.session_id);
        let host = if session.host.is_empty() {
            "sync"
        } else {
            session.host.as_str()
        };
        db.ensure_sync_session(
            &sid,
            host,
            session.tty.as_deref(),
            session.initial_cwd.as_deref(),
            session.started_at,
        )?;
        ensured.insert(sid);
    }

    for event in &payload.events {
        if tombstones.iter().any(|t| t.covers(&event.node_id, event.started_at)) {
            continue;
        }
        let sid = sync_session_id(&event.node_id, &event.session_id);
        if ensured.insert(sid.clone()) {
            // Event references a session the payload did not describe.
            db.ensure_sync_session(&sid, "sync", None, None, event.started_at)?;
        }
        let cmd_id = db.cmd_id(&event.cmd, event.started_at)?;
        let ended_at = if event.ended_at == 0.0 && event.duration_ms > 0 {
            event.started_at + event.duration_ms as f64 / 1000.0
        } else {
            event.ended_at
        };
        db.insert_sync_event(
            &event.cmd,
            event.started_at,
            ended_at,
            event.duration_ms,
            event.exit_code,
            &event.cwd,
            event.seq,
            &sid,
            cmd_id,
        )?;
    }

    for pin in &payload.pins {
        if pin.pinned {
            let sid = sync_session_id(remote_node, &pin.session_id);
            if let Err(e) = db.pin_session(&sid) {
                warn!(session = %sid, error = %e, "pin record for unknown session");
            }
        }
    }

    let segment_hash = hex::encode(Sha256::digest(&raw));
    db.record_imported_segment(vault_id, remote_node, segment_id, &segment_hash, now_ts())?;
    res.segments_imported += 1;
    Ok(())
}

async fn import_tombstone(
    db: &Store,
    store: &dyn ObjectStore,
    vault_id: &str,
    tombstone_id: &str,
    local_node_id: &str,
    master: Option<&[u8; 32]>,
    res: &mut PullResult,
) -> SyncResult<()> {
    let key = tombstone_key(vault_id, tombstone_id)?;
    res.get_calls += 1;
    let raw = store.get(&key).await?;
    check_tombstone_size(raw.len())?;

    let decoded = match decode_object(&raw) {
        Ok(d) => d,
        Err(e) => {
            res.tombstones_invalid += 1;
            return Err(e);
        }
    };
    if decoded.header.object_type != ObjectKind::Tombstone {
        res.tombstones_invalid += 1;
        return Err(SyncError::PayloadInvalid(format!(
            "expected tombstone, got {:?}",
            decoded.header.object_type
        )));
    }
    if decoded.header.vault_id != vault_id {
        res.tombstones_invalid += 1;
        return Err(SyncError::VaultMismatch {
            expected: vault_id.to_string(),
            actual: decoded.header.vault_id.clone(),
        });
    }
    if decoded.header.tombstone_id.as_deref() != Some(tombstone_id) {
        res.tombstones_invalid += 1;
        return Err(SyncError::PayloadInvalid(
            "tombstone header id does not match key".into(),
        ));
    }

    let plain = match decrypt_body(&decoded, master) {
        Ok(p) => p,
        Err(e) => {
            res.tombstones_invalid += 1;
            return Err(e);
        }
    };
    let payload = match parse_tombstone_payload(&plain) {
        Ok(p) => p,
        Err(e) => {
            res.tombstones_invalid += 1;
            return Err(e);
        }
    };

    let window = TombstoneWindow {
        node_id: payload.node_id,
        start_ts: payload.start_ts,
        end_ts: payload.end_ts,
    };
    apply_tombstone(db, vault_id, tombstone_id, &window, now_ts(), local_node_id)?;
    res.tombstones_applied += 1;
    Ok(())
}

async fn import_blob(
    db: &Store,
    store: &dyn ObjectStore,
    blob_dir: &Path,
    key: &str,
    vault_id: &str,
    master: Option<&[u8; 32]>,
    res: &mut PullResult,
) -> SyncResult<()> {
    res.get_calls += 1;
    let raw = store.get(key).await?;

    let decoded = match decode_object(&raw) {
        Ok(d) => d,
        Err(e) => {
            res.blobs_invalid += 1;
            return Err(e);
        }
    };
    if decoded.header.object_type != ObjectKind::Blob {
        return Ok(());
    }
    if decoded.header.vault_id != vault_id {
        res.blobs_invalid += 1;
        return Err(SyncError::VaultMismatch {
            expected: vault_id.to_string(),
            actual: decoded.header.vault_id.clone(),
        });
    }

    let plain = match decrypt_body(&decoded, master) {
        Ok(p) => p,
        Err(e) => {
            res.blobs_invalid += 1;
            return Err(e);
        }
    };

    // The header hash is the importer's integrity witness.
    let got_hash = hex::encode(Sha256::digest(&plain));
    let want_hash = decoded.header.blob_hash.as_deref().unwrap_or_default();
    if !got_hash.eq_ignore_ascii_case(want_hash) {
        res.blobs_hash_mismatch += 1;
        return Err(SyncError::PayloadInvalid(format!(
            "blob hash mismatch: got {got_hash}"
        )));
    }

    let stored = hx_blobstore::store(blob_dir, &plain)
        .map_err(|e| SyncError::Transport(format!("blob store: {e}")))?;
    let inserted = db.record_blob(&BlobRow {
        sha256: stored.sha256,
        storage_path: stored.storage_path.to_string_lossy().to_string(),
        byte_len: stored.byte_len as i64,
        compression: "zstd".to_string(),
        created_at: now_ts(),
    })?;
    if inserted {
        res.blobs_imported += 1;
    } else {
        res.blobs_skipped += 1;
    }
    Ok(())
}

/// `vaults/v/objects/manifests/<node>.hxman` → `<node>`.
fn manifest_basename(key: &str) -> Option<String> {
    let name = key.rsplit('/').next()?;
    name.strip_suffix(MANIFEST_EXT).map(str::to_string)
}

/// Last path component minus the extension.
fn key_basename(key: &str, ext: &str) -> Option<String> {
    let name = key.rsplit('/').next()?;
    name.strip_suffix(ext).map(str::to_string)
}

/// `vaults/v/objects/segments/<node>/<segment_id>.hxseg` → (node, id).
fn segment_key_parts(key: &str) -> Option<(String, String)> {
    let mut parts = key.rsplit('/');
    let file = parts.next()?;
    let node = parts.next()?;
    let segment_id = file.strip_suffix(SEGMENT_EXT)?;
    Some((node.to_string(), segment_id.to_string()))
}
