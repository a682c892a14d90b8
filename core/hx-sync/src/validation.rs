//! Identifier validation.
//!
//! Every identifier that reaches a store key passes through here first,
//! so no component above the codec layer ever interpolates an unchecked
//! string into a path. Traversal sequences are rejected before any
//! charset or length rule runs.

use crate::error::{SyncError, SyncResult};

/// Identifier classes with distinct charset/length rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdKind {
    Vault,
    Node,
    Segment,
    Tombstone,
    BlobHash,
}

impl IdKind {
    fn name(self) -> &'static str {
        match self {
            IdKind::Vault => "vault",
            IdKind::Node => "node",
            IdKind::Segment => "segment",
            IdKind::Tombstone => "tombstone",
            IdKind::BlobHash => "blob hash",
        }
    }
}

/// Validates an identifier for use in store keys.
///
/// - vault/node: `[A-Za-z0-9._-]`, 3..=64 chars
/// - segment/tombstone: 64 hex chars or canonical UUID
/// - blob hash: 64 hex chars
pub fn validate_identifier(id: &str, kind: IdKind) -> SyncResult<()> {
    // Traversal attempts fail before any other rule.
    if id.contains("..") || id.contains('/') || id.contains('\\') || id.contains('\0') {
        return Err(SyncError::IdentifierInvalid(format!(
            "{} id contains path traversal sequence",
            kind.name()
        )));
    }

    let ok = match kind {
        IdKind::Vault | IdKind::Node => {
            (3..=64).contains(&id.len())
                && id
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
        }
        IdKind::Segment | IdKind::Tombstone => is_hex64(id) || is_canonical_uuid(id),
        IdKind::BlobHash => is_hex64(id),
    };

    if !ok {
        return Err(SyncError::IdentifierInvalid(format!(
            "malformed {} id: {id:?}",
            kind.name()
        )));
    }
    Ok(())
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// `8-4-4-4-12` lowercase-or-uppercase hex groups.
fn is_canonical_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if *b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}
