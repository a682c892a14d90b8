//! Encryption primitives for hx sync objects.
//!
//! Uses a two-tier key system:
//!
//! 1. **Vault master key**: a 32-byte symmetric key shared by every
//!    enrolled device. Never leaves the local configuration.
//! 2. **Object key**: a random key generated per published object,
//!    wrapped under the master key and carried in the object header.
//!
//! Both tiers use XChaCha20-Poly1305 with 24-byte nonces. The body seal
//! binds the serialized header bytes as AEAD associated data, so any
//! header tamper invalidates the authentication tag.

mod error;

pub use error::{CryptoError, CryptoResult};

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;

/// Symmetric key length in bytes.
pub const KEY_SIZE: usize = 32;
/// XChaCha20-Poly1305 nonce length in bytes.
pub const NONCE_SIZE: usize = 24;
/// Poly1305 authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;
/// Length of a wrapped object key: wrap nonce + key ciphertext + tag.
pub const WRAPPED_KEY_SIZE: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;

/// Generates a fresh 32-byte key from the OS entropy source.
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut k = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut k);
    k
}

/// Generates a fresh 24-byte nonce from the OS entropy source.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut n = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut n);
    n
}

/// Parses a vault master key from its 64-hex-char configuration form.
pub fn parse_master_key(hex_str: &str) -> CryptoResult<[u8; KEY_SIZE]> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| CryptoError::KeyFormat(format!("master key is not hex: {e}")))?;
    if bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        });
    }
    let mut k = [0u8; KEY_SIZE];
    k.copy_from_slice(&bytes);
    Ok(k)
}

/// Seals `plaintext` with `key` and `nonce`, binding `aad`.
/// The returned ciphertext includes the Poly1305 tag.
pub fn seal(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let aead = XChaCha20Poly1305::new(Key::from_slice(key));
    aead.encrypt(
        XNonce::from_slice(nonce),
        Payload {
            msg: plaintext,
            aad,
        },
    )
    .map_err(|_| CryptoError::Encryption("seal failed".to_string()))
}

/// Opens `ciphertext` sealed by [`seal`]. Fails if the key, nonce, tag,
/// or associated data do not match the sealing inputs.
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let aead = XChaCha20Poly1305::new(Key::from_slice(key));
    aead.decrypt(
        XNonce::from_slice(nonce),
        Payload {
            msg: ciphertext,
            aad,
        },
    )
    .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
}

/// Wraps a per-object key under the vault master key.
/// Returns `wrap_nonce ‖ ciphertext` ([`WRAPPED_KEY_SIZE`] bytes).
pub fn wrap_key(master: &[u8; KEY_SIZE], obj_key: &[u8; KEY_SIZE]) -> CryptoResult<Vec<u8>> {
    let wrap_nonce = generate_nonce();
    let ct = seal(master, &wrap_nonce, obj_key, &[])?;
    let mut out = Vec::with_capacity(WRAPPED_KEY_SIZE);
    out.extend_from_slice(&wrap_nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Unwraps a per-object key produced by [`wrap_key`].
pub fn unwrap_key(master: &[u8; KEY_SIZE], wrapped: &[u8]) -> CryptoResult<[u8; KEY_SIZE]> {
    if wrapped.len() < WRAPPED_KEY_SIZE {
        return Err(CryptoError::Decryption("wrapped key too short".to_string()));
    }
    let mut wrap_nonce = [0u8; NONCE_SIZE];
    wrap_nonce.copy_from_slice(&wrapped[..NONCE_SIZE]);
    let plaintext = open(master, &wrap_nonce, &wrapped[NONCE_SIZE..], &[])?;
    if plaintext.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: plaintext.len(),
        });
    }
    let mut k = [0u8; KEY_SIZE];
    k.copy_from_slice(&plaintext);
    Ok(k)
}
