//! Envelope codec.
//!
//! Wire layout: `u32be header_length ‖ header_json ‖ body`. For encrypted
//! objects the body is sealed with a fresh per-object key under
//! XChaCha20-Poly1305, the object key is wrapped under the vault master
//! key, and the header bytes are bound as AEAD associated data.
//!
//! AAD discipline: the encoder serializes the header exactly once and
//! writes those bytes to the wire; the decoder feeds the header slice as
//! read from the wire back into the AEAD. Encode and decode can never
//! disagree on the associated data.

use crate::error::{SyncError, SyncResult};
use crate::object::{
    Header, Manifest, ObjectKind, SegmentPayload, TombstonePayload, CryptoEnv, MAGIC, VERSION,
};

/// Upper bound on the serialized header, enforced before parsing.
pub const MAX_HEADER_LEN: usize = 1024 * 1024;

/// A parsed (not yet decrypted) object.
pub struct Decoded<'a> {
    pub header: Header,
    /// Exact header bytes from the wire; the AEAD associated data.
    pub header_bytes: &'a [u8],
    pub body: &'a [u8],
}

/// Encodes a full object. With `encrypt`, the crypto block is populated
/// and the body sealed; otherwise the crypto block is empty and the body
/// travels as plaintext (trusted stores only).
pub fn encode_object(
    header: &mut Header,
    plaintext: &[u8],
    master: Option<&[u8; 32]>,
    encrypt: bool,
) -> SyncResult<Vec<u8>> {
    if encrypt {
        let master =
            master.ok_or_else(|| SyncError::Config("encryption enabled but no vault key".into()))?;
        let obj_key = hx_crypto::generate_key();
        let nonce = hx_crypto::generate_nonce();
        let wrapped = hx_crypto::wrap_key(master, &obj_key)?;
        header.crypto = CryptoEnv {
            nonce: hex::encode(nonce),
            wrapped_key: hex::encode(wrapped),
        };
        let header_bytes = serialize_header(header)?;
        let body = hx_crypto::seal(&obj_key, &nonce, plaintext, &header_bytes)?;
        return Ok(frame(&header_bytes, &body));
    }

    header.crypto = CryptoEnv::default();
    let header_bytes = serialize_header(header)?;
    Ok(frame(&header_bytes, plaintext))
}

/// Parses the framing and header. Does not decrypt.
pub fn decode_object(raw: &[u8]) -> SyncResult<Decoded<'_>> {
    if raw.len() < 4 {
        return Err(SyncError::BadFrame("object too short".into()));
    }
    let header_len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    if header_len > MAX_HEADER_LEN {
        return Err(SyncError::BadFrame("header length implausible".into()));
    }
    if raw.len() < 4 + header_len {
        return Err(SyncError::BadFrame("truncated object".into()));
    }
    let header_bytes = &raw[4..4 + header_len];
    let body = &raw[4 + header_len..];

    let header: Header = serde_json::from_slice(header_bytes)
        .map_err(|e| SyncError::BadFrame(format!("parse header: {e}")))?;
    if header.magic != MAGIC {
        return Err(SyncError::BadMagic);
    }
    if header.version != VERSION {
        return Err(SyncError::UnsupportedVersion(header.version));
    }
    Ok(Decoded {
        header,
        header_bytes,
        body,
    })
}

/// Decrypts the body of a decoded object (or returns it as-is when the
/// crypto block is empty). Any header tamper shows up here as
/// `Unauthenticated` because the wire header bytes are the AAD.
pub fn decrypt_body(decoded: &Decoded<'_>, master: Option<&[u8; 32]>) -> SyncResult<Vec<u8>> {
    if decoded.header.crypto.is_empty() {
        return Ok(decoded.body.to_vec());
    }
    let master = master.ok_or(SyncError::Unauthenticated)?;

    let nonce_bytes = hex::decode(&decoded.header.crypto.nonce)
        .map_err(|e| SyncError::BadFrame(format!("nonce hex: {e}")))?;
    if nonce_bytes.len() != hx_crypto::NONCE_SIZE {
        return Err(SyncError::BadFrame("nonce length".into()));
    }
    let mut nonce = [0u8; hx_crypto::NONCE_SIZE];
    nonce.copy_from_slice(&nonce_bytes);

    let wrapped = hex::decode(&decoded.header.crypto.wrapped_key)
        .map_err(|e| SyncError::BadFrame(format!("wrapped key hex: {e}")))?;
    let obj_key = hx_crypto::unwrap_key(master, &wrapped)?;

    Ok(hx_crypto::open(
        &obj_key,
        &nonce,
        decoded.body,
        decoded.header_bytes,
    )?)
}

/// Seals a segment payload into a full object.
pub fn seal_segment(
    header: &mut Header,
    payload: &SegmentPayload,
    master: Option<&[u8; 32]>,
    encrypt: bool,
) -> SyncResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(payload)
        .map_err(|e| SyncError::PayloadInvalid(format!("serialize segment: {e}")))?;
    encode_object(header, &plaintext, master, encrypt)
}

/// Seals a tombstone payload into a full object.
pub fn seal_tombstone(
    header: &mut Header,
    payload: &TombstonePayload,
    master: Option<&[u8; 32]>,
    encrypt: bool,
) -> SyncResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(payload)
        .map_err(|e| SyncError::PayloadInvalid(format!("serialize tombstone: {e}")))?;
    encode_object(header, &plaintext, master, encrypt)
}

/// Seals a manifest into a full object.
pub fn seal_manifest(
    manifest: &Manifest,
    master: Option<&[u8; 32]>,
    encrypt: bool,
) -> SyncResult<Vec<u8>> {
    if manifest.vault_id.is_empty() || manifest.node_id.is_empty() {
        return Err(SyncError::PayloadInvalid(
            "manifest missing vault_id or node_id".into(),
        ));
    }
    if manifest.manifest_seq == 0 {
        return Err(SyncError::PayloadInvalid("manifest_seq must be > 0".into()));
    }
    let plaintext = serde_json::to_vec(manifest)
        .map_err(|e| SyncError::PayloadInvalid(format!("serialize manifest: {e}")))?;
    let mut header = Header::new(ObjectKind::Manifest, &manifest.vault_id);
    header.node_id = Some(manifest.node_id.clone());
    encode_object(&mut header, &plaintext, master, encrypt)
}

/// Decodes, decrypts, parses, and validates a manifest object.
pub fn open_manifest(raw: &[u8], master: Option<&[u8; 32]>) -> SyncResult<Manifest> {
    let decoded = decode_object(raw)?;
    if decoded.header.object_type != ObjectKind::Manifest {
        return Err(SyncError::PayloadInvalid(format!(
            "expected manifest, got {:?}",
            decoded.header.object_type
        )));
    }
    let plaintext = decrypt_body(&decoded, master)?;
    let manifest: Manifest = serde_json::from_slice(&plaintext)
        .map_err(|e| SyncError::PayloadInvalid(format!("parse manifest: {e}")))?;
    if manifest.vault_id.is_empty() || manifest.node_id.is_empty() {
        return Err(SyncError::PayloadInvalid(
            "manifest missing vault_id or node_id".into(),
        ));
    }
    if manifest.manifest_seq == 0 {
        return Err(SyncError::PayloadInvalid("manifest_seq is 0".into()));
    }
    Ok(manifest)
}

/// Parses a decrypted segment payload.
pub fn parse_segment_payload(plaintext: &[u8]) -> SyncResult<SegmentPayload> {
    serde_json::from_slice(plaintext)
        .map_err(|e| SyncError::PayloadInvalid(format!("parse segment payload: {e}")))
}

/// Parses a decrypted tombstone payload.
pub fn parse_tombstone_payload(plaintext: &[u8]) -> SyncResult<TombstonePayload> {
    serde_json::from_slice(plaintext)
        .map_err(|e| SyncError::PayloadInvalid(format!("parse tombstone payload: {e}")))
}

fn serialize_header(header: &Header) -> SyncResult<Vec<u8>> {
    serde_json::to_vec(header)
        .map_err(|e| SyncError::PayloadInvalid(format!("serialize header: {e}")))
}

fn frame(header_bytes: &[u8], body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + header_bytes.len() + body.len());
    buf.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(header_bytes);
    buf.extend_from_slice(body);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::SegmentEvent;

    const KEY: [u8; 32] = [7u8; 32];

    fn sample_payload() -> SegmentPayload {
        SegmentPayload {
            events: vec![SegmentEvent {
                node_id: "nodeA".into(),
                session_id: "s1".into(),
                seq: 1,
                started_at: 100.0,
                ended_at: 101.0,
                duration_ms: 1000,
                exit_code: 0,
                cwd: "/home".into(),
                cmd: "ls -la".into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn encrypted_roundtrip() {
        let mut header = Header::new(ObjectKind::Segment, "vault1");
        header.node_id = Some("nodeA".into());
        header.segment_id = Some(crate::object::new_object_id());
        let raw = seal_segment(&mut header, &sample_payload(), Some(&KEY), true).unwrap();

        let decoded = decode_object(&raw).unwrap();
        assert_eq!(decoded.header.object_type, ObjectKind::Segment);
        assert!(!decoded.header.crypto.is_empty());

        let plain = decrypt_body(&decoded, Some(&KEY)).unwrap();
        let payload = parse_segment_payload(&plain).unwrap();
        assert_eq!(payload.events[0].cmd, "ls -la");
    }

    #[test]
    fn plaintext_roundtrip() {
        let mut header = Header::new(ObjectKind::Segment, "vault1");
        let raw = seal_segment(&mut header, &sample_payload(), None, false).unwrap();
        let decoded = decode_object(&raw).unwrap();
        assert!(decoded.header.crypto.is_empty());
        let plain = decrypt_body(&decoded, None).unwrap();
        assert_eq!(parse_segment_payload(&plain).unwrap().events.len(), 1);
    }

    #[test]
    fn sealing_twice_yields_different_bytes() {
        let payload = sample_payload();
        let mut h1 = Header::new(ObjectKind::Segment, "vault1");
        let mut h2 = Header::new(ObjectKind::Segment, "vault1");
        let a = seal_segment(&mut h1, &payload, Some(&KEY), true).unwrap();
        let b = seal_segment(&mut h2, &payload, Some(&KEY), true).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn body_bitflip_fails_authentication() {
        let mut header = Header::new(ObjectKind::Segment, "vault1");
        let mut raw = seal_segment(&mut header, &sample_payload(), Some(&KEY), true).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let decoded = decode_object(&raw).unwrap();
        assert!(matches!(
            decrypt_body(&decoded, Some(&KEY)),
            Err(SyncError::Unauthenticated)
        ));
    }

    #[test]
    fn header_bitflip_fails_authentication_or_frame() {
        let mut header = Header::new(ObjectKind::Segment, "vault1");
        let mut raw = seal_segment(&mut header, &sample_payload(), Some(&KEY), true).unwrap();
        // Flip a bit inside the vault_id value in the header JSON.
        let pos = raw
            .windows(7)
            .position(|w| w == b"vault1\"")
            .expect("vault_id in header");
        raw[pos] ^= 0x01;
        let result = decode_object(&raw).and_then(|d| decrypt_body(&d, Some(&KEY)));
        assert!(result.is_err());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let mut header = Header::new(ObjectKind::Segment, "vault1");
        let raw = seal_segment(&mut header, &sample_payload(), Some(&KEY), true).unwrap();
        let decoded = decode_object(&raw).unwrap();
        assert!(matches!(
            decrypt_body(&decoded, Some(&[8u8; 32])),
            Err(SyncError::Unauthenticated)
        ));
    }

    #[test]
    fn missing_key_for_encrypted_object_is_unauthenticated() {
        let mut header = Header::new(ObjectKind::Segment, "vault1");
        let raw = seal_segment(&mut header, &sample_payload(), Some(&KEY), true).unwrap();
        let decoded = decode_object(&raw).unwrap();
        assert!(matches!(
            decrypt_body(&decoded, None),
            Err(SyncError::Unauthenticated)
        ));
    }

    #[test]
    fn short_and_truncated_frames_rejected() {
        assert!(matches!(
            decode_object(&[0, 0]),
            Err(SyncError::BadFrame(_))
        ));
        let mut header = Header::new(ObjectKind::Segment, "vault1");
        let raw = seal_segment(&mut header, &sample_payload(), Some(&KEY), true).unwrap();
        assert!(matches!(
            decode_object(&raw[..10]),
            Err(SyncError::BadFrame(_))
        ));
    }

    #[test]
    fn implausible_header_length_rejected() {
        let mut raw = vec![0xFF, 0xFF, 0xFF, 0xFF];
        raw.extend_from_slice(b"junk");
        assert!(matches!(
            decode_object(&raw),
            Err(SyncError::BadFrame(_))
        ));
    }

    #[test]
    fn wrong_magic_and_version_rejected() {
        let mut header = Header::new(ObjectKind::Segment, "vault1");
        header.magic = "NOTHX".into();
        let raw = seal_segment(&mut header, &sample_payload(), None, false).unwrap();
        assert!(matches!(decode_object(&raw), Err(SyncError::BadMagic)));

        let mut header = Header::new(ObjectKind::Segment, "vault1");
        header.version = 9;
        let raw = seal_segment(&mut header, &sample_payload(), None, false).unwrap();
        assert!(matches!(
            decode_object(&raw),
            Err(SyncError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn manifest_roundtrip_and_kind_check() {
        let mut manifest = Manifest::new("vault1", "nodeA");
        manifest.add_segment(&crate::object::new_object_id());
        let raw = seal_manifest(&manifest, Some(&KEY), true).unwrap();
        let back = open_manifest(&raw, Some(&KEY)).unwrap();
        assert_eq!(back.manifest_seq, 1);
        assert_eq!(back.segments.len(), 1);
        assert_eq!(back.capabilities.supports, vec!["segments", "tombstones"]);

        // A segment object must not parse as a manifest.
        let mut header = Header::new(ObjectKind::Segment, "vault1");
        let seg = seal_segment(&mut header, &sample_payload(), Some(&KEY), true).unwrap();
        assert!(matches!(
            open_manifest(&seg, Some(&KEY)),
            Err(SyncError::PayloadInvalid(_))
        ));
    }

    #[test]
    fn zero_seq_manifest_rejected() {
        let mut manifest = Manifest::new("vault1", "nodeA");
        manifest.manifest_seq = 0;
        assert!(matches!(
            seal_manifest(&manifest, Some(&KEY), true),
            Err(SyncError::PayloadInvalid(_))
        ));
    }
}
