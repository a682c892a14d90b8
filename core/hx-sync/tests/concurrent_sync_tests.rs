//! Multi-writer convergence: concurrent local writers on two nodes,
//! repeated push/pull rounds, no duplicates.

mod support;

use support::{TestNode, VAULT};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_on_two_nodes_converge() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let node_b = TestNode::new(dir.path(), "nodeB");

    // 10 concurrent writers per node, one event each.
    let mut handles = Vec::new();
    for (node, name) in [(&node_a, "a"), (&node_b, "b")] {
        for i in 0..10i64 {
            let db = node.db.clone();
            let session = format!("{name}-sess");
            handles.push(tokio::spawn(async move {
                let ts = 1000.0 + i as f64;
                db.ensure_session(&session, "host", "tty", "/", ts).unwrap();
                let cmd_id = db.cmd_id(&format!("cmd {i}"), ts).unwrap();
                db.insert_live_event(&session, i, ts, ts + 1.0, 1000, 0, &[], "/", cmd_id, "cmd")
                    .unwrap();
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(node_a.db.count_events().unwrap(), 10);
    assert_eq!(node_b.db.count_events().unwrap(), 10);

    // Push/pull rounds until both sides stop changing.
    for _ in 0..3 {
        node_a.push().await;
        node_b.push().await;
        node_a.pull().await;
        node_b.pull().await;
    }

    // 10 own + 10 imported on each side; unique (session, seq) pairs
    // guarantee no duplicates survived the rounds.
    assert_eq!(node_a.db.count_events().unwrap(), 20);
    assert_eq!(node_b.db.count_events().unwrap(), 20);
    for i in 0..10 {
        assert!(node_a.db.has_event("nodeB|b-sess", i).unwrap());
        assert!(node_b.db.has_event("nodeA|a-sess", i).unwrap());
    }

    // Each side imported exactly the other's segments.
    assert_eq!(
        node_a.db.imported_segment_count(VAULT).unwrap(),
        node_b.db.imported_segment_count(VAULT).unwrap()
    );
}

#[tokio::test]
async fn repeated_rounds_are_stable() {
    let dir = tempfile::tempdir().unwrap();
    let node_a = TestNode::new(dir.path(), "nodeA");
    let node_b = TestNode::new(dir.path(), "nodeB");

    node_a.insert_live_event("s1", 1, 100.0, "ls");
    node_b.insert_live_event("s1", 1, 200.0, "pwd");

    for _ in 0..4 {
        node_a.push().await;
        node_b.push().await;
        node_a.pull().await;
        node_b.pull().await;
    }

    assert_eq!(node_a.db.count_events().unwrap(), 2);
    assert_eq!(node_b.db.count_events().unwrap(), 2);
}
