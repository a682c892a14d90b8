//! Object store abstraction and key layout.
//!
//! The store is an opaque key/value surface; everything under
//! `vaults/<vault>/objects/` is immutable published data, `tmp/` is the
//! only writable staging area and is never visible through `list`/`get`.
//! Key constructors validate every identifier, so no caller can reach
//! the store with an unchecked path component.

use crate::error::SyncResult;
use crate::validation::{validate_identifier, IdKind};
use async_trait::async_trait;

/// Suffixes for the four object kinds.
pub const SEGMENT_EXT: &str = ".hxseg";
pub const BLOB_EXT: &str = ".hxblob";
pub const TOMBSTONE_EXT: &str = ".hxtomb";
pub const MANIFEST_EXT: &str = ".hxman";

/// Backend contract for sync object storage.
///
/// `put_atomic` must be all-or-nothing: after success any reader sees
/// either the previous version or exactly the new bytes, never a prefix
/// or a mix; after failure no partial object is visible.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys under `prefix`, excluding staging. Missing prefix is empty,
    /// not an error. Order is not guaranteed.
    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>>;

    /// Full object bytes. `NotFound` is distinct from transport failure.
    async fn get(&self, key: &str) -> SyncResult<Vec<u8>>;

    /// Atomically publishes `data` under `key`.
    async fn put_atomic(&self, key: &str, data: &[u8]) -> SyncResult<()>;
}

/// `vaults/<vault>/objects/segments/<node>/<segment_id>.hxseg`
pub fn segment_key(vault_id: &str, node_id: &str, segment_id: &str) -> SyncResult<String> {
    validate_identifier(vault_id, IdKind::Vault)?;
    validate_identifier(node_id, IdKind::Node)?;
    validate_identifier(segment_id, IdKind::Segment)?;
    Ok(format!(
        "vaults/{vault_id}/objects/segments/{node_id}/{segment_id}{SEGMENT_EXT}"
    ))
}

/// `vaults/<vault>/objects/tombstones/<tombstone_id>.hxtomb`
pub fn tombstone_key(vault_id: &str, tombstone_id: &str) -> SyncResult<String> {
    validate_identifier(vault_id, IdKind::Vault)?;
    validate_identifier(tombstone_id, IdKind::Tombstone)?;
    Ok(format!(
        "vaults/{vault_id}/objects/tombstones/{tombstone_id}{TOMBSTONE_EXT}"
    ))
}

/// `vaults/<vault>/objects/blobs/<aa>/<bb>/<hash>.hxblob`
pub fn blob_key(vault_id: &str, blob_hash: &str) -> SyncResult<String> {
    validate_identifier(vault_id, IdKind::Vault)?;
    validate_identifier(blob_hash, IdKind::BlobHash)?;
    Ok(format!(
        "vaults/{vault_id}/objects/blobs/{}/{}/{blob_hash}{BLOB_EXT}",
        &blob_hash[..2],
        &blob_hash[2..4]
    ))
}

/// `vaults/<vault>/objects/manifests/<node>.hxman`
pub fn manifest_key(vault_id: &str, node_id: &str) -> SyncResult<String> {
    validate_identifier(vault_id, IdKind::Vault)?;
    validate_identifier(node_id, IdKind::Node)?;
    Ok(format!(
        "vaults/{vault_id}/objects/manifests/{node_id}{MANIFEST_EXT}"
    ))
}

/// Prefix of all manifests in a vault.
pub fn manifests_prefix(vault_id: &str) -> SyncResult<String> {
    validate_identifier(vault_id, IdKind::Vault)?;
    Ok(format!("vaults/{vault_id}/objects/manifests/"))
}

/// Prefix of one object-type directory (`segments`, `tombstones`, `blobs`).
pub fn objects_prefix(vault_id: &str, kind_dir: &str) -> SyncResult<String> {
    validate_identifier(vault_id, IdKind::Vault)?;
    Ok(format!("vaults/{vault_id}/objects/{kind_dir}/"))
}

/// True for keys that belong to published object space (never staging).
pub fn is_object_key(key: &str) -> bool {
    key.contains("/objects/") && !key.contains("tmp/") && !key.ends_with(".partial")
}
