//! Degraded prefix-scan import and blob replication.

mod support;

use hx_sync::{ObjectStore, SegmentEvent, SegmentPayload};
use support::{vault_key, TestNode, VAULT};

#[tokio::test]
async fn scan_imports_segment_when_manifest_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let node_b = TestNode::new(dir.path(), "nodeB");
    let blob_dir = tempfile::tempdir().unwrap();

    // A peer published a segment but its manifest never landed.
    let segment_id = "1f8fad5b-d9cb-469f-a165-70867728950e";
    let mut header = hx_sync::Header::new(hx_sync::ObjectKind::Segment, VAULT);
    header.node_id = Some("nodeA".to_string());
    header.segment_id = Some(segment_id.to_string());
    let payload = SegmentPayload {
        events: vec![SegmentEvent {
            node_id: "nodeA".into(),
            session_id: "s1".into(),
            seq: 1,
            started_at: 100.0,
            ended_at: 101.0,
            duration_ms: 1000,
            exit_code: 0,
            cwd: "/".into(),
            cmd: "ls".into(),
        }],
        ..Default::default()
    };
    let raw =
        hx_sync::codec::seal_segment(&mut header, &payload, Some(&vault_key()), true).unwrap();
    node_b
        .store()
        .put_atomic(
            &format!("vaults/{VAULT}/objects/segments/nodeA/{segment_id}.hxseg"),
            &raw,
        )
        .await
        .unwrap();

    // Manifest-driven pull finds nothing to do.
    let pulled = node_b.pull().await;
    assert_eq!(pulled.manifests_downloaded, 0);
    assert_eq!(pulled.segments_imported, 0);

    // The degraded scan picks the segment up.
    let scanned = hx_sync::scan_import(
        &node_b.db,
        &node_b.store(),
        blob_dir.path(),
        VAULT,
        "nodeB",
        Some(&vault_key()),
        true,
    )
    .await
    .unwrap();
    assert_eq!(scanned.segments_imported, 1);
    assert!(node_b.db.has_event("nodeA|s1", 1).unwrap());

    // Scanning again is idempotent.
    let again = hx_sync::scan_import(
        &node_b.db,
        &node_b.store(),
        blob_dir.path(),
        VAULT,
        "nodeB",
        Some(&vault_key()),
        true,
    )
    .await
    .unwrap();
    assert_eq!(again.segments_imported, 0);
    assert_eq!(again.segments_skipped, 1);
}

#[tokio::test]
async fn scan_skips_own_segments() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let blob_dir = tempfile::tempdir().unwrap();

    node_a.insert_live_event("s1", 1, 100.0, "ls");
    node_a.push().await;

    let scanned = hx_sync::scan_import(
        &node_a.db,
        &node_a.store(),
        blob_dir.path(),
        VAULT,
        "nodeA",
        Some(&vault_key()),
        true,
    )
    .await
    .unwrap();
    assert_eq!(scanned.segments_imported, 0);
    assert_eq!(scanned.segments_skipped, 1);
    // No composite ghost of our own session appeared.
    assert!(!node_a.db.has_event("nodeA|s1", 1).unwrap());
}

#[tokio::test]
async fn blobs_replicate_through_scan_with_hash_verification() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let node_b = TestNode::new(dir.path(), "nodeB");
    let blob_dir = tempfile::tempdir().unwrap();

    let artifact = b"build log: 73 tests passed";
    let (_, blob_hash) = hx_sync::publish_blob(
        &node_a.store(),
        VAULT,
        Some(&vault_key()),
        true,
        artifact,
    )
    .await
    .unwrap();

    let scanned = hx_sync::scan_import(
        &node_b.db,
        &node_b.store(),
        blob_dir.path(),
        VAULT,
        "nodeB",
        Some(&vault_key()),
        true,
    )
    .await
    .unwrap();
    assert_eq!(scanned.blobs_imported, 1);
    assert_eq!(scanned.blobs_hash_mismatch, 0);

    // The artifact landed in the local content-addressed store.
    let loaded = hx_blobstore::load(blob_dir.path(), &blob_hash).unwrap();
    assert_eq!(loaded, artifact);

    // Re-scan dedupes on the blobs table.
    let again = hx_sync::scan_import(
        &node_b.db,
        &node_b.store(),
        blob_dir.path(),
        VAULT,
        "nodeB",
        Some(&vault_key()),
        true,
    )
    .await
    .unwrap();
    assert_eq!(again.blobs_imported, 0);
    assert_eq!(again.blobs_skipped, 1);
}

#[tokio::test]
async fn blob_with_forged_hash_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let node_b = TestNode::new(dir.path(), "nodeB");
    let blob_dir = tempfile::tempdir().unwrap();

    // Header claims a hash the plaintext does not have.
    let forged_hash = "ab".repeat(32);
    let mut header = hx_sync::Header::new(hx_sync::ObjectKind::Blob, VAULT);
    header.blob_hash = Some(forged_hash.clone());
    header.byte_len_plain = Some(5);
    let raw = hx_sync::codec::encode_object(&mut header, b"lying", Some(&vault_key()), true).unwrap();
    node_b
        .store()
        .put_atomic(
            &format!(
                "vaults/{VAULT}/objects/blobs/{}/{}/{forged_hash}.hxblob",
                &forged_hash[..2],
                &forged_hash[2..4]
            ),
            &raw,
        )
        .await
        .unwrap();

    let scanned = hx_sync::scan_import(
        &node_b.db,
        &node_b.store(),
        blob_dir.path(),
        VAULT,
        "nodeB",
        Some(&vault_key()),
        true,
    )
    .await
    .unwrap();
    assert_eq!(scanned.blobs_imported, 0);
    assert_eq!(scanned.blobs_hash_mismatch, 1);
    assert!(!hx_blobstore::exists(blob_dir.path(), &forged_hash));
}

#[tokio::test]
async fn plaintext_vault_roundtrip_without_keys() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let node_b = TestNode::new(dir.path(), "nodeB");

    node_a.insert_live_event("s1", 1, 100.0, "ls -la");
    hx_sync::push(&node_a.db, &node_a.store(), VAULT, "nodeA", None, false)
        .await
        .unwrap();

    let res = hx_sync::pull(&node_b.db, &node_b.store(), VAULT, "nodeB", None, false)
        .await
        .unwrap();
    assert_eq!(res.segments_imported, 1);
    assert!(node_b.db.has_event("nodeA|s1", 1).unwrap());
}
