//! Error types for SoulChain.
//!
//! Every lower crate has its own error enum; [`SoulError`] wraps them and
//! sorts each failure into an [`ErrorClass`], which is what callers (and
//! the worker's retry policy) act on.

use thiserror::Error;

use soulchain_access::AccessError;
use soulchain_chain::ChainError;
use soulchain_core::{CoreError, ValidationError};
use soulchain_store::StoreError;

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad input or configuration. Never retried.
    Validation,
    /// A document, version, key or file that does not exist.
    NotFound,
    /// Tag, signature or hash mismatch.
    Authentication,
    /// The ledger refused a cross-agent read.
    AccessDenied,
    /// Storage, ledger or I/O unavailable. The only class worth retrying.
    Transient,
}

/// Errors that can occur during SoulChain operations.
#[derive(Debug, Error)]
pub enum SoulError {
    #[error("crypto error: {0}")]
    Core(#[from] CoreError),

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A document history failed its audit.
    #[error("history invalid: {0}")]
    History(#[from] ValidationError),

    /// Bytes did not match the hash they were committed under.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid bundle: {0}")]
    Bundle(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for SoulError {
    fn from(e: tokio::task::JoinError) -> Self {
        SoulError::Task(e.to_string())
    }
}

fn core_class(e: &CoreError) -> ErrorClass {
    match e {
        CoreError::Authentication | CoreError::InvalidSignature => ErrorClass::Authentication,
        _ => ErrorClass::Validation,
    }
}

impl SoulError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SoulError::Core(e) => core_class(e),
            SoulError::Access(AccessError::Decryption) => ErrorClass::Authentication,
            SoulError::Access(AccessError::Core(e)) => core_class(e),
            SoulError::Access(_) => ErrorClass::Validation,
            SoulError::Chain(e) => match e {
                ChainError::AccessDenied { .. } => ErrorClass::AccessDenied,
                ChainError::NotRegistered(_) => ErrorClass::NotFound,
                e if e.is_transient() => ErrorClass::Transient,
                _ => ErrorClass::Validation,
            },
            SoulError::Store(e) => match e {
                StoreError::NotFound(_) => ErrorClass::NotFound,
                e if e.is_transient() => ErrorClass::Transient,
                _ => ErrorClass::Validation,
            },
            SoulError::History(_) | SoulError::Integrity(_) => ErrorClass::Authentication,
            SoulError::NotFound(_) => ErrorClass::NotFound,
            SoulError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorClass::NotFound,
            SoulError::Io(_) | SoulError::Task(_) => ErrorClass::Transient,
            SoulError::Config(_) | SoulError::Bundle(_) | SoulError::Json(_) => ErrorClass::Validation,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Result type for SoulChain operations.
pub type Result<T> = std::result::Result<T, SoulError>;

#[cfg(test)]
mod tests {
    use super::*;
    use soulchain_core::{AgentAddress, DocType};

    #[test]
    fn test_classes() {
        let agent = AgentAddress::from_bytes([1; 32]);
        let cases: Vec<(SoulError, ErrorClass)> = vec![
            (CoreError::Authentication.into(), ErrorClass::Authentication),
            (CoreError::MalformedBlob("short".into()).into(), ErrorClass::Validation),
            (AccessError::Decryption.into(), ErrorClass::Authentication),
            (ChainError::Unavailable("down".into()).into(), ErrorClass::Transient),
            (ChainError::VersionConflict { expected: 1, got: 2 }.into(), ErrorClass::Validation),
            (
                ChainError::AccessDenied {
                    agent,
                    reader: agent,
                    doc_type: DocType::Memory,
                }
                .into(),
                ErrorClass::AccessDenied,
            ),
            (StoreError::Unavailable("503".into()).into(), ErrorClass::Transient),
            (StoreError::NotFound("blob".into()).into(), ErrorClass::NotFound),
            (SoulError::Integrity("hash".into()), ErrorClass::Authentication),
            (
                std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into(),
                ErrorClass::NotFound,
            ),
        ];
        for (err, class) in cases {
            assert_eq!(err.class(), class, "{err}");
        }
    }

    #[test]
    fn test_only_transient_retries() {
        assert!(SoulError::from(ChainError::Unavailable("x".into())).is_transient());
        assert!(!SoulError::Config("x".into()).is_transient());
    }
}
