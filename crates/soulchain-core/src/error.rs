//! Error types for SoulChain Core.

use thiserror::Error;

use crate::types::DocType;

/// Errors from the cryptographic primitives and document types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// AEAD tag mismatch. A wrong key and tampered bytes are indistinguishable.
    #[error("authentication failed")]
    Authentication,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("malformed blob: {0}")]
    MalformedBlob(String),

    #[error("unsupported keystore: {0}")]
    UnsupportedKeystore(String),

    #[error("unknown document type: {0}")]
    UnknownDocType(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Violations found while auditing a document history.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("version gap: expected {expected}, got {got}")]
    VersionGap { expected: u32, got: u32 },

    #[error("broken hash link at version {version}")]
    BrokenLink { version: u32 },

    #[error("mixed document types: expected {expected}, got {got} at version {version}")]
    MixedDocType {
        expected: DocType,
        got: DocType,
        version: u32,
    },

    #[error("signature verification failed at version {version}")]
    SignatureFailed { version: u32 },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
