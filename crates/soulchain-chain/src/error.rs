//! Error types for ledger operations.

use thiserror::Error;

use soulchain_core::{AgentAddress, DocType};

/// Errors surfaced by chain providers.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The acting agent has no soul registered.
    #[error("not registered: {0}")]
    NotRegistered(AgentAddress),

    /// A soul is already registered for this agent.
    #[error("already registered: {0}")]
    AlreadyRegistered(AgentAddress),

    /// Cross-agent read without a grant, ownership or parentage.
    #[error("access denied: {reader} cannot read {doc_type} of {agent}")]
    AccessDenied {
        agent: AgentAddress,
        reader: AgentAddress,
        doc_type: DocType,
    },

    /// The requested parent/child link is not allowed.
    #[error("invalid parent: {0}")]
    InvalidParent(String),

    /// The ledger assigned a different version than the writer expected.
    #[error("version conflict: expected {expected}, ledger assigned {got}")]
    VersionConflict { expected: u32, got: u32 },

    /// A submitted transaction used an out-of-order nonce.
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    /// The transaction failed signature or structural checks.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Encoding or decoding a ledger message failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The ledger could not be reached. Safe to retry.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused the call for a reason not modelled above.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ChainError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Unavailable(_) | ChainError::NonceMismatch { .. })
    }
}

/// Result type for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;
