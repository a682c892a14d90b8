//! Multi-node vault synchronization for hx.
//!
//! Devices in a vault replicate terminal history through a shared object
//! store (local folder or S3-compatible bucket) with no coordination
//! service. Each node owns a disjoint slice of the key space: segments
//! nest under the node id, and each `manifests/<node>.hxman` key has
//! exactly one legitimate writer. Convergence rests on snapshot
//! manifests with monotonic sequence numbers, idempotent import, and
//! commutative tombstones.
//!
//! # Layers
//!
//! - [`store`]: the opaque object-store contract and key layout, with
//!   [`folder_store::FolderStore`] and [`s3_store::S3Store`] backends
//!   and the [`retry::RetryStore`] wrapper.
//! - [`codec`] + [`object`]: the `HXOBJ` envelope: framed headers bound
//!   as AEAD associated data over XChaCha20-Poly1305-sealed bodies.
//! - [`publisher`]: push, tombstone, blob, and manifest publication.
//! - [`importer`]: manifest-driven pull and the degraded prefix scan.
//! - [`limits`], [`validation`]: resource caps and identifier rules.

pub mod codec;
pub mod error;
pub mod folder_store;
pub mod importer;
pub mod limits;
pub mod object;
pub mod publisher;
pub mod retry;
pub mod s3_store;
pub mod store;
pub mod validation;

pub use error::{SyncError, SyncResult};
pub use folder_store::FolderStore;
pub use importer::{pull, scan_import, PullResult};
pub use object::{
    Header, Manifest, ObjectKind, PinRecord, SegmentEvent, SegmentPayload, SegmentSession,
    TombstonePayload,
};
pub use publisher::{
    new_node_id, publish_blob, publish_manifest, publish_tombstone, push, PushResult,
};
pub use retry::{RetryConfig, RetryStore};
pub use s3_store::{S3Store, S3StoreConfig};
pub use store::ObjectStore;
