//! Local-folder object store.
//!
//! Atomicity comes from the filesystem: writes land in
//! `tmp/<random>.partial`, are fsynced, then renamed onto the final
//! path. A rename either fully replaces the destination or leaves the
//! previous version intact, so readers never observe a torn object.

use crate::error::{SyncError, SyncResult};
use crate::store::ObjectStore;
use async_trait::async_trait;
use rand::RngCore;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FolderStore {
    root: PathBuf,
}

impl FolderStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tmp_name() -> String {
        let mut b = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut b);
        format!("{}.partial", hex::encode(b))
    }

    fn walk(&self, prefix: &str, out: &mut Vec<String>) -> SyncResult<()> {
        let dir = self.root.join(prefix);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SyncError::Transport(format!("list {prefix}: {e}"))),
        };
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::Transport(format!("list {prefix}: {e}")))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "tmp" {
                continue;
            }
            let child = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix.trim_end_matches('/'), name)
            };
            let file_type = entry
                .file_type()
                .map_err(|e| SyncError::Transport(format!("stat {child}: {e}")))?;
            if file_type.is_dir() {
                self.walk(&child, out)?;
            } else {
                out.push(child);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FolderStore {
    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>> {
        let mut keys = Vec::new();
        self.walk(prefix.trim_end_matches('/'), &mut keys)?;
        Ok(keys)
    }

    async fn get(&self, key: &str) -> SyncResult<Vec<u8>> {
        let path = self.root.join(key);
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SyncError::NotFound(key.to_string()))
            }
            Err(e) => Err(SyncError::Transport(format!("get {key}: {e}"))),
        }
    }

    async fn put_atomic(&self, key: &str, data: &[u8]) -> SyncResult<()> {
        let final_path = self.root.join(key);
        let tmp_dir = self.root.join("tmp");
        let tmp_path = tmp_dir.join(Self::tmp_name());

        let io_err = |stage: &str, e: std::io::Error| {
            SyncError::Transport(format!("put {key} ({stage}): {e}"))
        };

        std::fs::create_dir_all(&tmp_dir).map_err(|e| io_err("mkdir tmp", e))?;
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err("mkdir objects", e))?;
        }

        let write_result = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(io_err("write", e));
        }

        if let Err(e) = std::fs::rename(&tmp_path, &final_path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(io_err("rename", e));
        }

        debug!(key, bytes = data.len(), "published object");
        Ok(())
    }
}
