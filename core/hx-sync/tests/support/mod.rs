//! Shared helpers for sync integration tests: nodes in one vault over a
//! folder store, each with its own in-memory database.

#![allow(dead_code)]

use hx_storage::{open_in_memory, Store};
use hx_sync::{FolderStore, PullResult, PushResult, TombstonePayload};
use std::path::{Path, PathBuf};

pub const VAULT: &str = "main";

/// The shared vault master key: 32 bytes of 0x01.
pub fn vault_key() -> [u8; 32] {
    [0x01; 32]
}

/// One device enrolled in the test vault.
pub struct TestNode {
    pub node_id: String,
    pub db: Store,
    pub store_root: PathBuf,
}

impl TestNode {
    pub fn new(store_root: &Path, node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            db: Store::new(open_in_memory().unwrap()),
            store_root: store_root.to_path_buf(),
        }
    }

    pub fn store(&self) -> FolderStore {
        FolderStore::new(&self.store_root)
    }

    /// Seeds a live event the way the spool ingester would.
    pub fn insert_live_event(&self, session_id: &str, seq: i64, started_at: f64, cmd: &str) {
        self.db
            .ensure_session(session_id, "host", "tty1", "/home/user", started_at)
            .unwrap();
        let cmd_id = self.db.cmd_id(cmd, started_at).unwrap();
        self.db
            .insert_live_event(
                session_id,
                seq,
                started_at,
                started_at + 1.0,
                1000,
                0,
                &[],
                "/home/user",
                cmd_id,
                cmd,
            )
            .unwrap();
    }

    pub async fn push(&self) -> PushResult {
        hx_sync::push(
            &self.db,
            &self.store(),
            VAULT,
            &self.node_id,
            Some(&vault_key()),
            true,
        )
        .await
        .unwrap()
    }

    pub async fn pull(&self) -> PullResult {
        hx_sync::pull(
            &self.db,
            &self.store(),
            VAULT,
            &self.node_id,
            Some(&vault_key()),
            true,
        )
        .await
        .unwrap()
    }

    pub async fn publish_tombstone(&self, payload: &TombstonePayload) -> String {
        hx_sync::publish_tombstone(
            &self.db,
            &self.store(),
            VAULT,
            &self.node_id,
            Some(&vault_key()),
            true,
            payload,
        )
        .await
        .unwrap()
    }
}

/// All segment object files currently in the store, for tamper tests.
pub fn segment_files(store_root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let segments_dir = store_root.join("vaults").join(VAULT).join("objects").join("segments");
    let Ok(nodes) = std::fs::read_dir(&segments_dir) else {
        return found;
    };
    for node in nodes.flatten() {
        if let Ok(files) = std::fs::read_dir(node.path()) {
            for file in files.flatten() {
                if file.path().extension().is_some_and(|e| e == "hxseg") {
                    found.push(file.path());
                }
            }
        }
    }
    found
}
