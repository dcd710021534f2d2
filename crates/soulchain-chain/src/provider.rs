//! ChainProvider trait: the ledger contract every adapter implements.
//!
//! A provider acts on behalf of exactly one agent (its [`address`]). Writes
//! are performed as that agent; cross-agent reads are checked against that
//! agent's access rights.
//!
//! [`address`]: ChainProvider::address

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use soulchain_access::AgreementPublicKey;
use soulchain_core::{AgentAddress, DocType, Digest, Document, DocumentWrite};

use crate::error::Result;

/// Identifier of an accepted ledger transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// Proof that a document write was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub tx: TxHash,
    /// The version the ledger assigned.
    pub version: u32,
}

/// The ledger contract.
///
/// # Semantics
///
/// - **Append-only**: `write_document` appends with `version` equal to the
///   prior count and `prev_hash` equal to the prior `content_hash` (zero for
///   the first write). Documents are never updated or deleted.
/// - **Registration**: every write requires the acting agent to be
///   registered, otherwise `NotRegistered`.
/// - **Access**: `has_access(agent, reader, t)` holds when `reader` is the
///   agent, the agent's registered parent, or holds an explicit grant.
/// - **Lineage**: each agent has at most one parent, fixed once set.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// The agent this provider acts as.
    fn address(&self) -> AgentAddress;

    /// Explorer link for a transaction, when the network has one.
    fn tx_url(&self, _tx: &TxHash) -> Option<String> {
        None
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Register the acting agent and publish its agreement key.
    async fn register_soul(&self, agreement_key: AgreementPublicKey) -> Result<TxHash>;

    async fn is_registered(&self, agent: &AgentAddress) -> Result<bool>;

    /// The agreement key an agent published at registration.
    async fn agreement_key_of(&self, agent: &AgentAddress) -> Result<Option<AgreementPublicKey>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a new version of a document as the acting agent.
    async fn write_document(&self, write: DocumentWrite) -> Result<Anchor>;

    /// The acting agent's newest version of `doc_type`.
    async fn latest_document(&self, doc_type: DocType) -> Result<Option<Document>>;

    /// A specific version; `None` when out of range.
    async fn document_at(&self, doc_type: DocType, version: u32) -> Result<Option<Document>>;

    async fn document_count(&self, doc_type: DocType) -> Result<u32>;

    /// Compare a stored `content_hash`. False for out-of-range versions.
    async fn verify_document(&self, doc_type: DocType, version: u32, expected: &Digest) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Access
    // ─────────────────────────────────────────────────────────────────────────

    async fn grant_access(&self, reader: &AgentAddress, doc_type: DocType) -> Result<TxHash>;

    async fn revoke_access(&self, reader: &AgentAddress, doc_type: DocType) -> Result<TxHash>;

    async fn has_access(&self, agent: &AgentAddress, reader: &AgentAddress, doc_type: DocType) -> Result<bool>;

    /// Another agent's newest version, as the acting agent.
    ///
    /// Fails with `AccessDenied` unless the acting agent has access.
    async fn latest_document_of(&self, agent: &AgentAddress, doc_type: DocType) -> Result<Option<Document>>;

    /// Another agent's document at `version`, with the same access rule.
    async fn document_of_at(
        &self,
        agent: &AgentAddress,
        doc_type: DocType,
        version: u32,
    ) -> Result<Option<Document>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Lineage
    // ─────────────────────────────────────────────────────────────────────────

    /// Record `child` as a child of the acting agent.
    async fn register_child(&self, child: &AgentAddress) -> Result<TxHash>;

    async fn get_children(&self, agent: &AgentAddress) -> Result<Vec<AgentAddress>>;

    async fn get_parent(&self, agent: &AgentAddress) -> Result<Option<AgentAddress>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Access keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Store an opaque access-key blob for `reader`, owned by the acting agent.
    async fn store_access_key(&self, reader: &AgentAddress, doc_type: DocType, key: Vec<u8>) -> Result<TxHash>;

    async fn get_access_key(
        &self,
        owner: &AgentAddress,
        reader: &AgentAddress,
        doc_type: DocType,
    ) -> Result<Option<Vec<u8>>>;

    async fn remove_access_key(&self, reader: &AgentAddress, doc_type: DocType) -> Result<TxHash>;
}
