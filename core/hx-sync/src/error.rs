//! Sync error taxonomy.
//!
//! Per-object failures (frame, auth, schema, vault binding, resource
//! caps) are recorded in the pull result and never abort the operation;
//! only database and configuration errors are fatal.

use hx_crypto::CryptoError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Store I/O failure. Retried when the message matches a transient
    /// pattern; otherwise recorded and the object skipped.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("object not found: {0}")]
    NotFound(String),

    /// Framing problem: too short, implausible header length, bad JSON.
    #[error("bad frame: {0}")]
    BadFrame(String),

    #[error("bad magic")]
    BadMagic,

    #[error("unsupported object version {0}")]
    UnsupportedVersion(u32),

    /// AEAD failure: tamper, wrong vault key, or wrong associated data.
    #[error("object failed authentication")]
    Unauthenticated,

    #[error("payload invalid: {0}")]
    PayloadInvalid(String),

    #[error("object vault_id {actual} does not match local vault {expected}")]
    VaultMismatch { expected: String, actual: String },

    #[error("invalid identifier: {0}")]
    IdentifierInvalid(String),

    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),

    #[error("database error: {0}")]
    Database(#[from] hx_storage::StorageError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<CryptoError> for SyncError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Decryption(_) | CryptoError::InvalidKeyLength { .. } => {
                SyncError::Unauthenticated
            }
            CryptoError::Encryption(msg) => SyncError::PayloadInvalid(msg),
            CryptoError::KeyFormat(msg) => SyncError::Config(msg),
        }
    }
}
