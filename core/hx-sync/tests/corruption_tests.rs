//! Corruption isolation, tamper detection, and scan robustness: a bad
//! object or a bad peer must never block valid data.

mod support;

use support::{segment_files, vault_key, TestNode, VAULT};

#[tokio::test]
async fn corrupt_manifest_does_not_block_other_peers() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let node_b = TestNode::new(dir.path(), "nodeB");

    node_a.insert_live_event("s1", 1, 100.0, "ls -la");
    node_a.push().await;

    // 13 random bytes where a manifest should be.
    let manifests_dir = dir
        .path()
        .join("vaults")
        .join(VAULT)
        .join("objects")
        .join("manifests");
    std::fs::write(manifests_dir.join("Xcorrupt.hxman"), b"\x00garbage 1234").unwrap();

    let res = node_b.pull().await;
    assert_eq!(res.manifests_downloaded, 1);
    assert_eq!(res.segments_imported, 1);
    assert!(!res.errors.is_empty());
    assert!(node_b.db.has_event("nodeA|s1", 1).unwrap());
}

#[tokio::test]
async fn tampered_segment_is_rejected_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let node_b = TestNode::new(dir.path(), "nodeB");

    node_a.insert_live_event("s1", 1, 100.0, "ls -la");
    node_a.push().await;

    // Flip one bit anywhere in the stored segment body.
    let files = segment_files(dir.path());
    assert_eq!(files.len(), 1);
    let mut raw = std::fs::read(&files[0]).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    std::fs::write(&files[0], &raw).unwrap();

    let res = node_b.pull().await;
    assert!(res.segments_unauth >= 1);
    assert_eq!(res.segments_imported, 0);
    assert!(!node_b.db.has_event("nodeA|s1", 1).unwrap());
    assert_eq!(node_b.db.count_events().unwrap(), 0);
}

#[tokio::test]
async fn truncated_segment_is_invalid_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let node_b = TestNode::new(dir.path(), "nodeB");

    node_a.insert_live_event("s1", 1, 100.0, "ls");
    node_a.push().await;

    let files = segment_files(dir.path());
    let raw = std::fs::read(&files[0]).unwrap();
    std::fs::write(&files[0], &raw[..8]).unwrap();

    let res = node_b.pull().await;
    assert!(res.segments_invalid >= 1);
    assert!(!res.errors.is_empty());
}

#[tokio::test]
async fn missing_segment_is_recorded_and_pull_continues() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let node_b = TestNode::new(dir.path(), "nodeB");

    node_a.insert_live_event("s1", 1, 100.0, "ls");
    node_a.push().await;

    // The manifest references a segment that is no longer visible
    // (eventual-consistency lag, or an operator mistake).
    let files = segment_files(dir.path());
    std::fs::remove_file(&files[0]).unwrap();

    let res = node_b.pull().await;
    assert_eq!(res.segments_imported, 0);
    assert!(res.errors.iter().any(|e| e.contains("not found")), "{:?}", res.errors);
}

#[tokio::test]
async fn one_bad_peer_never_blocks_a_good_one() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let node_b = TestNode::new(dir.path(), "nodeB");
    let node_c = TestNode::new(dir.path(), "nodeC");

    node_a.insert_live_event("s1", 1, 100.0, "good data");
    node_a.push().await;
    node_b.insert_live_event("s1", 1, 100.0, "poisoned");
    node_b.push().await;

    // Corrupt everything nodeB published, manifest included.
    let manifests_dir = dir
        .path()
        .join("vaults")
        .join(VAULT)
        .join("objects")
        .join("manifests");
    std::fs::write(manifests_dir.join("nodeB.hxman"), b"not an object").unwrap();

    let res = node_c.pull().await;
    assert_eq!(res.manifests_downloaded, 1);
    assert_eq!(res.segments_imported, 1);
    assert!(!res.errors.is_empty());
    assert!(node_c.db.has_event("nodeA|s1", 1).unwrap());
    assert!(!node_c.db.has_event("nodeB|s1", 1).unwrap());
}

#[tokio::test]
async fn wrong_vault_object_is_rejected() {
    let dir = tempfile::tempdir().unwrap();

    // A segment sealed for another vault, planted under this vault's key
    // space with a matching node/segment path.
    let mut header = hx_sync::Header::new(hx_sync::ObjectKind::Segment, "othervault");
    let segment_id = "0f8fad5b-d9cb-469f-a165-70867728950e";
    header.node_id = Some("nodeA".to_string());
    header.segment_id = Some(segment_id.to_string());
    let raw = hx_sync::codec::seal_segment(
        &mut header,
        &hx_sync::SegmentPayload::default(),
        Some(&vault_key()),
        true,
    )
    .unwrap();

    let node_b = TestNode::new(dir.path(), "nodeB");
    let store = node_b.store();
    use hx_sync::ObjectStore;
    store
        .put_atomic(
            &format!("vaults/{VAULT}/objects/segments/nodeA/{segment_id}.hxseg"),
            &raw,
        )
        .await
        .unwrap();

    let mut manifest = hx_sync::Manifest::new(VAULT, "nodeA");
    manifest.add_segment(segment_id);
    let manifest_raw = hx_sync::codec::seal_manifest(&manifest, Some(&vault_key()), true).unwrap();
    store
        .put_atomic(&format!("vaults/{VAULT}/objects/manifests/nodeA.hxman"), &manifest_raw)
        .await
        .unwrap();

    let res = node_b.pull().await;
    assert_eq!(res.segments_imported, 0);
    assert!(res.segments_invalid >= 1);
    assert!(res
        .errors
        .iter()
        .any(|e| e.contains("does not match local vault")), "{:?}", res.errors);
}

#[tokio::test]
async fn staging_leftovers_are_invisible_to_pull() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let node_b = TestNode::new(dir.path(), "nodeB");

    node_a.insert_live_event("s1", 1, 100.0, "ls");
    node_a.push().await;

    // Simulate a crashed writer: stale partial in the staging area.
    let tmp = dir.path().join("tmp");
    std::fs::create_dir_all(&tmp).unwrap();
    std::fs::write(tmp.join("deadbeef.partial"), b"half an object").unwrap();

    let res = node_b.pull().await;
    assert!(res.errors.is_empty(), "{:?}", res.errors);
    assert_eq!(res.segments_imported, 1);
}
