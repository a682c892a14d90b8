//! Local relational store for hx.
//!
//! Persists sessions, events, the command dictionary, artifact/blob rows,
//! and the sync bookkeeping tables (published events, imported segments,
//! applied tombstones, peer manifest watermarks). Backed by DuckDB behind
//! a shared connection; all mutation paths use idempotent inserts so the
//! importer and the spool ingester can both retry safely.

mod db;
mod error;
mod retention;
mod store;
mod tombstones;

pub use db::{open, open_in_memory};
pub use error::{StorageError, StorageResult};
pub use retention::{prune_blobs, prune_events};
pub use store::{
    sync_session_id, ArtifactRow, BlobRow, SessionMeta, Store, UnpublishedEvent,
};
pub use tombstones::{apply_tombstone, load_applied_tombstones, TombstoneWindow};

/// Current epoch time as fractional seconds, the store's native timestamp.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}
