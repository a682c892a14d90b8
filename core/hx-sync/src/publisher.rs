//! Publisher: local events → sealed segments, tombstones, blobs, and
//! snapshot manifests.
//!
//! Publish order is store-first: the object is atomically visible in the
//! store before the local bookkeeping row commits, so the store is the
//! source of truth and a crash between the two steps re-publishes rather
//! than losing data. Manifest publication is best-effort per push; the
//! next push rebuilds the snapshot from the bookkeeping tables.

use crate::codec::{encode_object, seal_manifest, seal_segment, seal_tombstone};
use crate::error::{SyncError, SyncResult};
use crate::object::{
    new_object_id, Header, Manifest, ObjectKind, SegmentEvent, SegmentPayload, SegmentSession,
    TombstonePayload,
};
use crate::store::{blob_key, manifest_key, segment_key, tombstone_key, ObjectStore};
use crate::validation::{validate_identifier, IdKind};
use hx_storage::{apply_tombstone, now_ts, Store, TombstoneWindow};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Counters returned by [`push`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushResult {
    pub segments_published: u32,
    pub events_published: usize,
}

/// Publishes all unpublished live events as one segment, then refreshes
/// this node's manifest. A push with nothing to publish touches neither
/// the store nor the database.
pub async fn push(
    db: &Store,
    store: &dyn ObjectStore,
    vault_id: &str,
    node_id: &str,
    master: Option<&[u8; 32]>,
    encrypt: bool,
) -> SyncResult<PushResult> {
    validate_identifier(vault_id, IdKind::Vault)?;
    validate_identifier(node_id, IdKind::Node)?;
    if encrypt && master.is_none() {
        return Err(SyncError::Config(format!(
            "vault {vault_id} has encryption enabled but no master key"
        )));
    }

    let events = db.unpublished_live_events(vault_id)?;
    if events.is_empty() {
        return Ok(PushResult::default());
    }

    let segment_id = new_object_id();
    let payload = build_segment_payload(db, node_id, &events)?;

    let mut header = Header::new(ObjectKind::Segment, vault_id);
    header.node_id = Some(node_id.to_string());
    header.segment_id = Some(segment_id.clone());
    let raw = seal_segment(&mut header, &payload, master, encrypt)?;

    let key = segment_key(vault_id, node_id, &segment_id)?;
    store.put_atomic(&key, &raw).await?;

    let event_ids: Vec<i64> = events.iter().map(|e| e.event_id).collect();
    db.mark_events_published(&event_ids, vault_id, node_id, &segment_id)?;

    let result = PushResult {
        segments_published: 1,
        events_published: events.len(),
    };
    info!(
        vault_id,
        node_id,
        segment_id = %segment_id,
        events = events.len(),
        "published segment"
    );

    // Best-effort: the snapshot is rebuilt from bookkeeping on the next
    // push, so a manifest failure must not roll back the segment.
    if let Err(e) = publish_manifest(db, store, vault_id, node_id, master, encrypt).await {
        warn!(vault_id, node_id, error = %e, "manifest publish failed; will retry on next push");
    }

    Ok(result)
}

/// Publishes this node's manifest snapshot with the next sequence
/// number: the union of every segment and tombstone this node has ever
/// published to the vault, never a delta.
pub async fn publish_manifest(
    db: &Store,
    store: &dyn ObjectStore,
    vault_id: &str,
    node_id: &str,
    master: Option<&[u8; 32]>,
    encrypt: bool,
) -> SyncResult<u64> {
    let current = db.manifest_seq(vault_id, node_id)?;

    let mut manifest = Manifest::new(vault_id, node_id);
    manifest.manifest_seq = current + 1;
    for segment_id in db.published_segment_ids(vault_id, node_id)? {
        manifest.add_segment(&segment_id);
    }
    for tombstone_id in db.published_tombstone_ids(vault_id, node_id)? {
        manifest.add_tombstone(&tombstone_id);
    }

    let raw = seal_manifest(&manifest, master, encrypt)?;
    let key = manifest_key(vault_id, node_id)?;
    store.put_atomic(&key, &raw).await?;

    db.set_manifest_seq(vault_id, node_id, manifest.manifest_seq, now_ts())?;
    Ok(manifest.manifest_seq)
}

/// Publishes a deletion window as a tombstone object and applies it
/// locally. The tombstone reaches the store before any local row is
/// deleted, so peers can never resurrect what it covers. This is the
/// `forget` path; retention shares it.
pub async fn publish_tombstone(
    db: &Store,
    store: &dyn ObjectStore,
    vault_id: &str,
    node_id: &str,
    master: Option<&[u8; 32]>,
    encrypt: bool,
    payload: &TombstonePayload,
) -> SyncResult<String> {
    validate_identifier(vault_id, IdKind::Vault)?;
    validate_identifier(node_id, IdKind::Node)?;
    if encrypt && master.is_none() {
        return Err(SyncError::Config(format!(
            "vault {vault_id} has encryption enabled but no master key"
        )));
    }

    let tombstone_id = new_object_id();
    let mut header = Header::new(ObjectKind::Tombstone, vault_id);
    header.tombstone_id = Some(tombstone_id.clone());
    let raw = seal_tombstone(&mut header, payload, master, encrypt)?;

    let key = tombstone_key(vault_id, &tombstone_id)?;
    store.put_atomic(&key, &raw).await?;

    let now = now_ts();
    db.record_published_tombstone(&tombstone_id, vault_id, node_id, now)?;

    if !db.is_tombstone_applied(vault_id, &tombstone_id)? {
        let window = TombstoneWindow {
            node_id: payload.node_id.clone(),
            start_ts: payload.start_ts,
            end_ts: payload.end_ts,
        };
        let deleted = apply_tombstone(db, vault_id, &tombstone_id, &window, now, node_id)?;
        info!(vault_id, tombstone_id = %tombstone_id, deleted, "published and applied tombstone");
    }

    if let Err(e) = publish_manifest(db, store, vault_id, node_id, master, encrypt).await {
        warn!(vault_id, node_id, error = %e, "manifest publish failed; will retry on next push");
    }

    Ok(tombstone_id)
}

/// Publishes a file artifact as a content-addressed blob object.
/// The same plaintext always lands under the same key, so republishing
/// is idempotent. Returns (store key, plaintext sha256).
pub async fn publish_blob(
    store: &dyn ObjectStore,
    vault_id: &str,
    master: Option<&[u8; 32]>,
    encrypt: bool,
    plaintext: &[u8],
) -> SyncResult<(String, String)> {
    validate_identifier(vault_id, IdKind::Vault)?;
    if encrypt && master.is_none() {
        return Err(SyncError::Config(format!(
            "vault {vault_id} has encryption enabled but no master key"
        )));
    }

    let blob_hash = hex::encode(Sha256::digest(plaintext));
    let key = blob_key(vault_id, &blob_hash)?;

    let mut header = Header::new(ObjectKind::Blob, vault_id);
    header.blob_hash = Some(blob_hash.clone());
    header.byte_len_plain = Some(plaintext.len() as u64);
    let raw = encode_object(&mut header, plaintext, master, encrypt)?;

    store.put_atomic(&key, &raw).await?;
    info!(vault_id, blob_hash = %blob_hash, bytes = plaintext.len(), "published blob");
    Ok((key, blob_hash))
}

fn build_segment_payload(
    db: &Store,
    node_id: &str,
    events: &[hx_storage::UnpublishedEvent],
) -> SyncResult<SegmentPayload> {
    let mut seg_events = Vec::with_capacity(events.len());
    let mut session_ids: Vec<String> = Vec::new();

    for event in events {
        if !session_ids.contains(&event.session_id) {
            session_ids.push(event.session_id.clone());
        }
        seg_events.push(SegmentEvent {
            node_id: node_id.to_string(),
            session_id: event.session_id.clone(),
            seq: event.seq,
            started_at: event.started_at,
            ended_at: event.ended_at.unwrap_or(event.started_at),
            duration_ms: event.duration_ms.unwrap_or(0),
            exit_code: event.exit_code.unwrap_or(0),
            cwd: event.cwd.clone(),
            cmd: event.cmd.clone(),
        });
    }

    let mut sessions = Vec::with_capacity(session_ids.len());
    for session_id in &session_ids {
        if let Some(meta) = db.session_meta(session_id)? {
            sessions.push(SegmentSession {
                session_id: meta.session_id,
                started_at: meta.started_at,
                ended_at: meta.ended_at,
                host: meta.host,
                tty: meta.tty,
                initial_cwd: meta.initial_cwd,
            });
        }
    }

    Ok(SegmentPayload {
        events: seg_events,
        sessions,
        ..Default::default()
    })
}

/// Mints a node identity for a newly enrolled device.
pub fn new_node_id() -> String {
    new_object_id()
}
