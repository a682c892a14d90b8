//! Object model: headers, payload schemas, and manifests.
//!
//! Four object kinds flow between peers — segments, blobs, tombstones,
//! and manifests — all sharing the same envelope framing. Payload shapes
//! are disjoint per kind; the codec refuses an object whose header names
//! one kind but whose payload parses as another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire magic for every hx object.
pub const MAGIC: &str = "HXOBJ";
/// Current envelope version.
pub const VERSION: u32 = 0;

/// Object kind carried in `object_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Segment,
    Blob,
    Tombstone,
    Manifest,
}

/// Per-object envelope crypto metadata: outer nonce and the object key
/// wrapped under the vault master key. Empty for plaintext objects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoEnv {
    /// 24-byte XChaCha20 nonce, hex.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nonce: String,
    /// wrap_nonce ‖ wrapped K_obj ‖ tag, hex.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub wrapped_key: String,
}

impl CryptoEnv {
    pub fn is_empty(&self) -> bool {
        self.nonce.is_empty() && self.wrapped_key.is_empty()
    }
}

/// Plaintext routing/metadata prefix of every object. Serialized once at
/// encode time; those exact bytes are the AEAD associated data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Header {
    pub magic: String,
    pub version: u32,
    pub object_type: ObjectKind,
    pub vault_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub crypto: CryptoEnv,

    // Segment and manifest objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,

    // Tombstone objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstone_id: Option<String>,

    // Blob objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_len_plain: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

impl Header {
    /// A header with the common fields set and kind-specific fields empty.
    pub fn new(object_type: ObjectKind, vault_id: &str) -> Self {
        Self {
            magic: MAGIC.to_string(),
            version: VERSION,
            object_type,
            vault_id: vault_id.to_string(),
            created_at: Utc::now(),
            crypto: CryptoEnv::default(),
            node_id: None,
            segment_id: None,
            tombstone_id: None,
            blob_hash: None,
            byte_len_plain: None,
            compression: None,
        }
    }
}

/// One event inside a segment. Uniqueness key across the vault:
/// (node_id, session_id, seq).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentEvent {
    pub node_id: String,
    pub session_id: String,
    pub seq: i64,
    pub started_at: f64,
    pub ended_at: f64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub exit_code: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cwd: String,
    pub cmd: String,
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

/// Session metadata carried alongside segment events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentSession {
    pub session_id: String,
    pub started_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<f64>,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_cwd: Option<String>,
}

/// Artifact reference attached to a segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub session_id: String,
    pub path: String,
    pub hash: String,
}

/// Pin-state record replicated with a segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinRecord {
    pub session_id: String,
    pub pinned: bool,
}

/// Encrypted payload of a `.hxseg` object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SegmentPayload {
    pub events: Vec<SegmentEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<SegmentSession>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactMeta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pins: Vec<PinRecord>,
}

/// Encrypted payload of a `.hxtomb` object: an inclusive time window,
/// optionally scoped to one node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TombstonePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub start_ts: f64,
    pub end_ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A segment reference inside a manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestSegment {
    pub segment_id: String,
    pub created_at: DateTime<Utc>,
}

/// A tombstone reference inside a manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestTombstone {
    pub tombstone_id: String,
    pub created_at: DateTime<Utc>,
}

/// Capability block for forward compatibility.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestCapabilities {
    pub format_version: u32,
    pub supports: Vec<String>,
}

/// A node's published-objects snapshot. Write-once per sequence; peers
/// discriminate versions solely by `manifest_seq`, never by timestamps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub vault_id: String,
    pub node_id: String,
    pub manifest_seq: u64,
    pub created_at: DateTime<Utc>,
    pub segments: Vec<ManifestSegment>,
    pub tombstones: Vec<ManifestTombstone>,
    pub capabilities: ManifestCapabilities,
}

impl Manifest {
    pub fn new(vault_id: &str, node_id: &str) -> Self {
        Self {
            vault_id: vault_id.to_string(),
            node_id: node_id.to_string(),
            manifest_seq: 1,
            created_at: Utc::now(),
            segments: Vec::new(),
            tombstones: Vec::new(),
            capabilities: ManifestCapabilities {
                format_version: 0,
                supports: vec!["segments".to_string(), "tombstones".to_string()],
            },
        }
    }

    pub fn add_segment(&mut self, segment_id: &str) {
        self.segments.push(ManifestSegment {
            segment_id: segment_id.to_string(),
            created_at: Utc::now(),
        });
    }

    pub fn add_tombstone(&mut self, tombstone_id: &str) {
        self.tombstones.push(ManifestTombstone {
            tombstone_id: tombstone_id.to_string(),
            created_at: Utc::now(),
        });
    }
}

/// Mints a new object/node identifier.
pub fn new_object_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
