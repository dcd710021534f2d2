//! Ledger wire codec.
//!
//! State-changing calls travel as signed CBOR [`Transaction`]s; reads travel
//! as [`LedgerQuery`] values. Every hash-typed field crosses the boundary as
//! a canonical [`Bytes32`].

use serde::{Deserialize, Serialize};
use std::fmt;

use soulchain_core::{
    AgentAddress, DocType, Digest, Document, Ed25519Signature, Keypair, StorageRef,
};

use crate::error::{ChainError, Result};
use crate::provider::TxHash;

/// A 32-byte ledger word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bytes32(pub [u8; 32]);

impl Bytes32 {
    pub const ZERO: Self = Self([0u8; 32]);

    /// Normalize text into a 32-byte word.
    ///
    /// - `0x` followed by 64 hex digits, or 64 bare hex digits, decode to
    ///   the raw bytes they spell.
    /// - Anything else is taken as UTF-8, truncated or right-padded with
    ///   zeros to 32 bytes.
    pub fn canonicalize(value: &str) -> Self {
        let digits = value.strip_prefix("0x").unwrap_or(value);
        if digits.len() == 64 {
            let mut out = [0u8; 32];
            if hex::decode_to_slice(digits, &mut out).is_ok() {
                return Self(out);
            }
        }
        let mut out = [0u8; 32];
        let bytes = value.as_bytes();
        let n = bytes.len().min(32);
        out[..n].copy_from_slice(&bytes[..n]);
        Self(out)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<Digest> for Bytes32 {
    fn from(digest: Digest) -> Self {
        Self::canonicalize(&digest.to_hex())
    }
}

impl From<Bytes32> for Digest {
    fn from(word: Bytes32) -> Self {
        Digest::from_bytes(word.0)
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32({})", &hex::encode(self.0)[..16])
    }
}

/// A document as the ledger stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub doc_type: u8,
    pub content_hash: Bytes32,
    pub encrypted_hash: Bytes32,
    pub storage_ref: String,
    pub version: u32,
    pub timestamp: i64,
    pub prev_hash: Bytes32,
    pub signature: Vec<u8>,
}

impl From<&Document> for LedgerDocument {
    fn from(doc: &Document) -> Self {
        Self {
            doc_type: doc.doc_type.as_u8(),
            content_hash: doc.content_hash.into(),
            encrypted_hash: doc.encrypted_hash.into(),
            storage_ref: doc.storage_ref.as_str().to_string(),
            version: doc.version,
            timestamp: doc.timestamp,
            prev_hash: doc.prev_hash.into(),
            signature: doc.signature.as_bytes().to_vec(),
        }
    }
}

impl TryFrom<LedgerDocument> for Document {
    type Error = ChainError;

    fn try_from(doc: LedgerDocument) -> Result<Self> {
        let doc_type = DocType::from_u8(doc.doc_type)
            .ok_or_else(|| ChainError::Codec(format!("unknown doc type {}", doc.doc_type)))?;
        let signature = Ed25519Signature::try_from(doc.signature.as_slice())
            .map_err(|e| ChainError::Codec(e.to_string()))?;
        Ok(Document {
            doc_type,
            content_hash: doc.content_hash.into(),
            encrypted_hash: doc.encrypted_hash.into(),
            storage_ref: StorageRef::new(doc.storage_ref),
            version: doc.version,
            timestamp: doc.timestamp,
            prev_hash: doc.prev_hash.into(),
            signature,
        })
    }
}

/// A state-changing ledger call, executed as the transaction sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCall {
    RegisterSoul {
        agreement_key: [u8; 32],
    },
    WriteDocument {
        doc_type: u8,
        content_hash: Bytes32,
        encrypted_hash: Bytes32,
        storage_ref: String,
        signature: Vec<u8>,
    },
    GrantAccess {
        reader: AgentAddress,
        doc_type: u8,
    },
    RevokeAccess {
        reader: AgentAddress,
        doc_type: u8,
    },
    RegisterChild {
        child: AgentAddress,
    },
    StoreAccessKey {
        reader: AgentAddress,
        doc_type: u8,
        key: Vec<u8>,
    },
    RemoveAccessKey {
        reader: AgentAddress,
        doc_type: u8,
    },
}

/// A read against ledger state. `caller` is the agent whose rights apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerQuery {
    NextNonce { agent: AgentAddress },
    IsRegistered { agent: AgentAddress },
    AgreementKey { agent: AgentAddress },
    LatestDocument { caller: AgentAddress, agent: AgentAddress, doc_type: u8 },
    DocumentAt { caller: AgentAddress, agent: AgentAddress, doc_type: u8, version: u32 },
    DocumentCount { agent: AgentAddress, doc_type: u8 },
    VerifyDocument { agent: AgentAddress, doc_type: u8, version: u32, expected: Bytes32 },
    HasAccess { agent: AgentAddress, reader: AgentAddress, doc_type: u8 },
    Children { agent: AgentAddress },
    Parent { agent: AgentAddress },
    AccessKey { owner: AgentAddress, reader: AgentAddress, doc_type: u8 },
}

/// The answer to a [`LedgerQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryResponse {
    Nonce(u64),
    Bool(bool),
    Count(u32),
    Key(Option<[u8; 32]>),
    Document(Option<LedgerDocument>),
    Agent(Option<AgentAddress>),
    Agents(Vec<AgentAddress>),
    Bytes(Option<Vec<u8>>),
}

/// An unsigned ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: AgentAddress,
    pub nonce: u64,
    pub call: LedgerCall,
}

impl Transaction {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| ChainError::Codec(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| ChainError::Codec(e.to_string()))
    }

    /// Encode and sign as `keypair`, which must own `from`.
    pub fn sign(&self, keypair: &Keypair) -> Result<SignedTransaction> {
        if keypair.address() != self.from {
            return Err(ChainError::InvalidTransaction(
                "signer does not match sender".into(),
            ));
        }
        let payload = self.to_bytes()?;
        let signature = keypair.sign(&payload);
        Ok(SignedTransaction { payload, signature })
    }
}

/// A CBOR transaction with its sender's signature over the exact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub payload: Vec<u8>,
    pub signature: Ed25519Signature,
}

impl SignedTransaction {
    pub fn tx_hash(&self) -> TxHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.payload);
        hasher.update(self.signature.as_bytes());
        TxHash(*hasher.finalize().as_bytes())
    }

    /// Decode and check the signature against the claimed sender.
    pub fn open(&self) -> Result<Transaction> {
        let tx = Transaction::from_bytes(&self.payload)?;
        tx.from
            .public_key()
            .verify(&self.payload, &self.signature)
            .map_err(|_| ChainError::InvalidTransaction("bad signature".into()))?;
        Ok(tx)
    }
}

/// What the ledger returns for an accepted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    /// Assigned version, for document writes.
    pub version: Option<u32>,
}
