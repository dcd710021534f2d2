//! Error types for selective disclosure.

use thiserror::Error;

/// Errors that can occur while issuing or opening access keys.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The access key did not authenticate under the derived shared key.
    ///
    /// Either the wrong reader/owner pair was used or the blob was altered.
    #[error("access key decryption failed")]
    Decryption,

    /// The serialized access key is not well-formed.
    #[error("malformed access key: {0}")]
    Malformed(String),

    /// The peer's agreement key is unusable.
    #[error("invalid agreement key: {0}")]
    InvalidAgreementKey(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] soulchain_core::CoreError),
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;
