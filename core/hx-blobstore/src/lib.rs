//! Content-addressed artifact file store.
//!
//! Blobs are addressed by the sha256 of their plaintext, compressed with
//! zstd on disk, and sharded by the first two hex chars of the hash:
//! `<blob_dir>/<aa>/<hash>.zst`. Hashing the plaintext (never the
//! compressed bytes) keeps dedup stable across compression levels and
//! matches the hash carried in sync blob object headers.

use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("incomplete write for {0}")]
    IncompleteWrite(String),
}

/// A stored blob's identity and location.
#[derive(Clone, Debug)]
pub struct StoredBlob {
    pub sha256: String,
    pub storage_path: PathBuf,
    pub byte_len: usize,
}

/// Writes `content` to the store, content-addressed by its sha256.
/// Re-storing existing content is a cheap no-op (dedupe by path).
pub fn store(blob_dir: &Path, content: &[u8]) -> BlobStoreResult<StoredBlob> {
    let sha256 = hex::encode(Sha256::digest(content));
    let shard = blob_dir.join(&sha256[..2]);
    std::fs::create_dir_all(&shard)?;
    let storage_path = shard.join(format!("{sha256}.zst"));

    if storage_path.exists() {
        return Ok(StoredBlob {
            sha256,
            storage_path,
            byte_len: content.len(),
        });
    }

    let file = std::fs::File::create(&storage_path)?;
    let mut encoder = zstd::stream::write::Encoder::new(file, 0)?;
    if let Err(e) = encoder.write_all(content) {
        let _ = std::fs::remove_file(&storage_path);
        return Err(e.into());
    }
    if let Err(e) = encoder.finish() {
        let _ = std::fs::remove_file(&storage_path);
        return Err(e.into());
    }

    Ok(StoredBlob {
        sha256,
        storage_path,
        byte_len: content.len(),
    })
}

/// Reads and decompresses the blob with the given hash.
pub fn load(blob_dir: &Path, sha256: &str) -> BlobStoreResult<Vec<u8>> {
    let path = blob_path(blob_dir, sha256);
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BlobStoreError::NotFound(sha256.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut decoder = zstd::stream::read::Decoder::new(file)?;
    let mut content = Vec::new();
    decoder.read_to_end(&mut content)?;
    Ok(content)
}

pub fn exists(blob_dir: &Path, sha256: &str) -> bool {
    blob_path(blob_dir, sha256).exists()
}

/// The on-disk path for a hash (whether or not the blob exists).
pub fn blob_path(blob_dir: &Path, sha256: &str) -> PathBuf {
    if sha256.len() < 2 {
        return blob_dir.join(format!("{sha256}.zst"));
    }
    blob_dir.join(&sha256[..2]).join(format!("{sha256}.zst"))
}
