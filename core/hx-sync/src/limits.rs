//! Resource limits for pull operations.
//!
//! Caps protect against hostile or corrupt stores: oversized objects and
//! unbounded manifests are rejected per object, never aborting the pull.

use crate::error::{SyncError, SyncResult};
use crate::object::Manifest;

/// Maximum manifest object size in bytes.
pub const MAX_MANIFEST_SIZE: usize = 10 * 1024 * 1024;
/// Maximum segment object size in bytes.
pub const MAX_SEGMENT_SIZE: usize = 100 * 1024 * 1024;
/// Maximum tombstone object size in bytes (tombstones are tiny).
pub const MAX_TOMBSTONE_SIZE: usize = 1024;
/// Maximum objects processed in one pull.
pub const MAX_OBJECTS_PER_PULL: usize = 10_000;

pub fn check_manifest_size(size: usize) -> SyncResult<()> {
    if size > MAX_MANIFEST_SIZE {
        return Err(SyncError::ResourceExceeded(format!(
            "manifest is {size} bytes, max {MAX_MANIFEST_SIZE}"
        )));
    }
    Ok(())
}

pub fn check_segment_size(size: usize) -> SyncResult<()> {
    if size > MAX_SEGMENT_SIZE {
        return Err(SyncError::ResourceExceeded(format!(
            "segment is {size} bytes, max {MAX_SEGMENT_SIZE}"
        )));
    }
    Ok(())
}

pub fn check_tombstone_size(size: usize) -> SyncResult<()> {
    if size > MAX_TOMBSTONE_SIZE {
        return Err(SyncError::ResourceExceeded(format!(
            "tombstone is {size} bytes, max {MAX_TOMBSTONE_SIZE}"
        )));
    }
    Ok(())
}

/// Counts objects processed across one pull.
pub struct PullLimiter {
    processed: usize,
    max: usize,
}

impl PullLimiter {
    pub fn new(max: usize) -> Self {
        let max = if max == 0 { MAX_OBJECTS_PER_PULL } else { max };
        Self { processed: 0, max }
    }

    /// Admits one more object, or errors once the budget is spent.
    pub fn admit(&mut self) -> SyncResult<()> {
        if self.processed >= self.max {
            return Err(SyncError::ResourceExceeded(format!(
                "object budget of {} per pull exhausted",
                self.max
            )));
        }
        self.processed += 1;
        Ok(())
    }

    pub fn processed(&self) -> usize {
        self.processed
    }
}

/// Validates a manifest's reference counts against the pull budget.
pub fn validate_manifest(manifest: &Manifest) -> SyncResult<()> {
    let total = manifest.segments.len() + manifest.tombstones.len();
    if total > MAX_OBJECTS_PER_PULL {
        return Err(SyncError::ResourceExceeded(format!(
            "manifest references {total} objects, max {MAX_OBJECTS_PER_PULL}"
        )));
    }
    if manifest.segments.len() > MAX_OBJECTS_PER_PULL / 2 {
        return Err(SyncError::ResourceExceeded(format!(
            "manifest references {} segments, max {}",
            manifest.segments.len(),
            MAX_OBJECTS_PER_PULL / 2
        )));
    }
    if manifest.tombstones.len() > MAX_OBJECTS_PER_PULL / 2 {
        return Err(SyncError::ResourceExceeded(format!(
            "manifest references {} tombstones, max {}",
            manifest.tombstones.len(),
            MAX_OBJECTS_PER_PULL / 2
        )));
    }
    Ok(())
}
