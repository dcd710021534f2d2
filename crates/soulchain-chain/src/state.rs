//! Ledger state: the rules every ledger adapter enforces.
//!
//! `LedgerState` is plain data with no locking or I/O. The in-memory ledger
//! and the local node both wrap it, so the two adapters cannot drift apart
//! on semantics.

use std::collections::{HashMap, HashSet};

use soulchain_access::AgreementPublicKey;
use soulchain_core::{AgentAddress, DocType, Digest, Document, DocumentWrite};

use crate::error::{ChainError, Result};

/// A registered agent.
#[derive(Debug, Clone)]
pub struct SoulRecord {
    pub agreement_key: AgreementPublicKey,
    pub registered_at: i64,
}

/// Complete ledger contents.
#[derive(Debug, Default)]
pub struct LedgerState {
    /// Registered souls.
    souls: HashMap<AgentAddress, SoulRecord>,

    /// Per-agent, per-type append-only logs.
    documents: HashMap<(AgentAddress, DocType), Vec<Document>>,

    /// Explicit grants: (owner, reader, type).
    grants: HashSet<(AgentAddress, AgentAddress, DocType)>,

    /// Wrapped keys: (owner, reader, type) -> blob.
    access_keys: HashMap<(AgentAddress, AgentAddress, DocType), Vec<u8>>,

    /// child -> parent.
    parents: HashMap<AgentAddress, AgentAddress>,

    /// parent -> children, in registration order.
    children: HashMap<AgentAddress, Vec<AgentAddress>>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_registered(&self, agent: &AgentAddress) -> Result<()> {
        if self.souls.contains_key(agent) {
            Ok(())
        } else {
            Err(ChainError::NotRegistered(*agent))
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register(&mut self, agent: AgentAddress, agreement_key: AgreementPublicKey, now: i64) -> Result<()> {
        if self.souls.contains_key(&agent) {
            return Err(ChainError::AlreadyRegistered(agent));
        }
        self.souls.insert(
            agent,
            SoulRecord {
                agreement_key,
                registered_at: now,
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, agent: &AgentAddress) -> bool {
        self.souls.contains_key(agent)
    }

    pub fn soul(&self, agent: &AgentAddress) -> Option<&SoulRecord> {
        self.souls.get(agent)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a document. Version and back-link are assigned here.
    pub fn append(&mut self, agent: AgentAddress, write: DocumentWrite, now: i64) -> Result<Document> {
        self.require_registered(&agent)?;

        let log = self.documents.entry((agent, write.doc_type)).or_default();
        let version = log.len() as u32;
        let prev_hash = log.last().map(|d| d.content_hash).unwrap_or(Digest::ZERO);
        let document = Document::from_write(write, version, prev_hash, now);
        log.push(document.clone());
        Ok(document)
    }

    pub fn latest(&self, agent: &AgentAddress, doc_type: DocType) -> Option<&Document> {
        self.documents.get(&(*agent, doc_type)).and_then(|log| log.last())
    }

    pub fn at(&self, agent: &AgentAddress, doc_type: DocType, version: u32) -> Option<&Document> {
        self.documents
            .get(&(*agent, doc_type))
            .and_then(|log| log.get(version as usize))
    }

    pub fn count(&self, agent: &AgentAddress, doc_type: DocType) -> u32 {
        self.documents
            .get(&(*agent, doc_type))
            .map(|log| log.len() as u32)
            .unwrap_or(0)
    }

    pub fn verify(&self, agent: &AgentAddress, doc_type: DocType, version: u32, expected: &Digest) -> bool {
        self.at(agent, doc_type, version)
            .map(|d| d.content_hash == *expected)
            .unwrap_or(false)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Access
    // ─────────────────────────────────────────────────────────────────────────

    pub fn grant(&mut self, owner: AgentAddress, reader: AgentAddress, doc_type: DocType) -> Result<()> {
        self.require_registered(&owner)?;
        self.grants.insert((owner, reader, doc_type));
        Ok(())
    }

    /// Revoking a grant that does not exist is a no-op.
    pub fn revoke(&mut self, owner: AgentAddress, reader: AgentAddress, doc_type: DocType) -> Result<()> {
        self.require_registered(&owner)?;
        self.grants.remove(&(owner, reader, doc_type));
        Ok(())
    }

    pub fn has_access(&self, agent: &AgentAddress, reader: &AgentAddress, doc_type: DocType) -> bool {
        agent == reader
            || self.parents.get(agent) == Some(reader)
            || self.grants.contains(&(*agent, *reader, doc_type))
    }

    fn check_access(&self, agent: &AgentAddress, reader: &AgentAddress, doc_type: DocType) -> Result<()> {
        if self.has_access(agent, reader, doc_type) {
            Ok(())
        } else {
            Err(ChainError::AccessDenied {
                agent: *agent,
                reader: *reader,
                doc_type,
            })
        }
    }

    /// Cross-agent latest read, checked against `reader`'s access.
    pub fn latest_for(&self, reader: &AgentAddress, agent: &AgentAddress, doc_type: DocType) -> Result<Option<&Document>> {
        self.check_access(agent, reader, doc_type)?;
        Ok(self.latest(agent, doc_type))
    }

    /// Cross-agent versioned read, checked against `reader`'s access.
    pub fn at_for(
        &self,
        reader: &AgentAddress,
        agent: &AgentAddress,
        doc_type: DocType,
        version: u32,
    ) -> Result<Option<&Document>> {
        self.check_access(agent, reader, doc_type)?;
        Ok(self.at(agent, doc_type, version))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lineage
    // ─────────────────────────────────────────────────────────────────────────

    /// Link `child` under `parent`.
    ///
    /// The parent must be registered; the child need not be. A child may
    /// have only one parent, and no agent may become its own ancestor.
    pub fn register_child(&mut self, parent: AgentAddress, child: AgentAddress) -> Result<()> {
        self.require_registered(&parent)?;
        if parent == child {
            return Err(ChainError::InvalidParent("an agent cannot parent itself".into()));
        }
        if let Some(existing) = self.parents.get(&child) {
            return Err(ChainError::InvalidParent(format!(
                "{child} already has parent {existing}"
            )));
        }
        if self.ancestors(&parent).contains(&child) {
            return Err(ChainError::InvalidParent(format!(
                "{child} is an ancestor of {parent}"
            )));
        }
        self.parents.insert(child, parent);
        self.children.entry(parent).or_default().push(child);
        Ok(())
    }

    pub fn parent(&self, agent: &AgentAddress) -> Option<AgentAddress> {
        self.parents.get(agent).copied()
    }

    pub fn children(&self, agent: &AgentAddress) -> Vec<AgentAddress> {
        self.children.get(agent).cloned().unwrap_or_default()
    }

    /// All ancestors of `agent`, nearest first.
    pub fn ancestors(&self, agent: &AgentAddress) -> Vec<AgentAddress> {
        let mut out = Vec::new();
        let mut current = *agent;
        while let Some(parent) = self.parents.get(&current) {
            if out.contains(parent) {
                break;
            }
            out.push(*parent);
            current = *parent;
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Access keys
    // ─────────────────────────────────────────────────────────────────────────

    pub fn store_access_key(
        &mut self,
        owner: AgentAddress,
        reader: AgentAddress,
        doc_type: DocType,
        key: Vec<u8>,
    ) -> Result<()> {
        self.require_registered(&owner)?;
        self.access_keys.insert((owner, reader, doc_type), key);
        Ok(())
    }

    pub fn access_key(&self, owner: &AgentAddress, reader: &AgentAddress, doc_type: DocType) -> Option<&Vec<u8>> {
        self.access_keys.get(&(*owner, *reader, doc_type))
    }

    pub fn remove_access_key(&mut self, owner: AgentAddress, reader: AgentAddress, doc_type: DocType) -> Result<()> {
        self.require_registered(&owner)?;
        self.access_keys.remove(&(owner, reader, doc_type));
        Ok(())
    }
}
