//! Document types and ledger records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::{Digest, Ed25519Signature};
use crate::error::CoreError;

/// The closed vocabulary of document categories.
///
/// The discriminant is the on-ledger identifier and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DocType {
    Soul = 0,
    Memory = 1,
    Agents = 2,
    User = 3,
    Daily = 4,
    Chat = 5,
    LoveMap = 6,
    Musing = 7,
    Coaching = 8,
    Tools = 9,
    Identity = 10,
}

impl DocType {
    /// Every type, in identifier order.
    pub const ALL: [DocType; 11] = [
        DocType::Soul,
        DocType::Memory,
        DocType::Agents,
        DocType::User,
        DocType::Daily,
        DocType::Chat,
        DocType::LoveMap,
        DocType::Musing,
        DocType::Coaching,
        DocType::Tools,
        DocType::Identity,
    ];

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Lowercase name, as used in key derivation info strings.
    pub const fn name(self) -> &'static str {
        match self {
            DocType::Soul => "soul",
            DocType::Memory => "memory",
            DocType::Agents => "agents",
            DocType::User => "user",
            DocType::Daily => "daily",
            DocType::Chat => "chat",
            DocType::LoveMap => "love_map",
            DocType::Musing => "musing",
            DocType::Coaching => "coaching",
            DocType::Tools => "tools",
            DocType::Identity => "identity",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DocType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == lower)
            .ok_or_else(|| CoreError::UnknownDocType(s.to_string()))
    }
}

/// An opaque locator for bytes held by a storage adapter.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageRef(pub String);

impl StorageRef {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageRef({})", self.0)
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fields an owner submits when appending a document version.
///
/// The ledger assigns `version`, `timestamp` and `prev_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentWrite {
    pub doc_type: DocType,
    pub content_hash: Digest,
    pub encrypted_hash: Digest,
    pub storage_ref: StorageRef,
    pub signature: Ed25519Signature,
}

/// One immutable entry in an agent's per-type document log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub doc_type: DocType,
    /// SHA-256 of the plaintext.
    pub content_hash: Digest,
    /// SHA-256 of the framed ciphertext bundle.
    pub encrypted_hash: Digest,
    pub storage_ref: StorageRef,
    /// 0-based position in the log.
    pub version: u32,
    /// Ledger acceptance time (Unix ms).
    pub timestamp: i64,
    /// `content_hash` of the previous version, zero for version 0.
    pub prev_hash: Digest,
    /// Owner's signature over the raw `content_hash` bytes.
    pub signature: Ed25519Signature,
}

impl Document {
    /// Build the record the ledger stores for an accepted write.
    pub fn from_write(write: DocumentWrite, version: u32, prev_hash: Digest, timestamp: i64) -> Self {
        Self {
            doc_type: write.doc_type,
            content_hash: write.content_hash,
            encrypted_hash: write.encrypted_hash,
            storage_ref: write.storage_ref,
            version,
            timestamp,
            prev_hash,
            signature: write.signature,
        }
    }

    pub fn is_first(&self) -> bool {
        self.version == 0
    }
}
