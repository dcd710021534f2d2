//! In-memory ledger.
//!
//! This is primarily for testing and offline use. It has the same semantics
//! as a real ledger but keeps everything in memory with no persistence.
//! One [`MemoryLedger`] is shared by many agents; each agent talks to it
//! through its own [`MemoryChain`] handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use soulchain_access::AgreementPublicKey;
use soulchain_core::{now_millis, AgentAddress, DocType, Digest, Document, DocumentWrite};

use crate::error::Result;
use crate::provider::{Anchor, ChainProvider, TxHash};
use crate::state::LedgerState;

#[derive(Default)]
struct Shared {
    state: RwLock<LedgerState>,
    tx_counter: AtomicU64,
}

/// A ledger shared between agents. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    shared: Arc<Shared>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider acting as `address` on this ledger.
    pub fn connect(&self, address: AgentAddress) -> MemoryChain {
        MemoryChain {
            ledger: self.clone(),
            address,
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a unique transaction hash for an accepted call.
    pub(crate) fn next_tx(&self, from: &AgentAddress) -> TxHash {
        let n = self.shared.tx_counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = blake3::Hasher::new_derive_key("soulchain memory ledger tx");
        hasher.update(from.as_bytes());
        hasher.update(&n.to_be_bytes());
        TxHash(*hasher.finalize().as_bytes())
    }
}

/// One agent's view of a [`MemoryLedger`].
#[derive(Clone)]
pub struct MemoryChain {
    ledger: MemoryLedger,
    address: AgentAddress,
}

impl MemoryChain {
    /// Create a provider on a fresh, private ledger.
    pub fn new(address: AgentAddress) -> Self {
        MemoryLedger::new().connect(address)
    }

    /// The shared ledger this handle writes to.
    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }
}

#[async_trait]
impl ChainProvider for MemoryChain {
    fn address(&self) -> AgentAddress {
        self.address
    }

    async fn register_soul(&self, agreement_key: AgreementPublicKey) -> Result<TxHash> {
        self.ledger
            .write()
            .register(self.address, agreement_key, now_millis())?;
        Ok(self.ledger.next_tx(&self.address))
    }

    async fn is_registered(&self, agent: &AgentAddress) -> Result<bool> {
        Ok(self.ledger.read().is_registered(agent))
    }

    async fn agreement_key_of(&self, agent: &AgentAddress) -> Result<Option<AgreementPublicKey>> {
        Ok(self.ledger.read().soul(agent).map(|s| s.agreement_key))
    }

    async fn write_document(&self, write: DocumentWrite) -> Result<Anchor> {
        let document = self.ledger.write().append(self.address, write, now_millis())?;
        Ok(Anchor {
            tx: self.ledger.next_tx(&self.address),
            version: document.version,
        })
    }

    async fn latest_document(&self, doc_type: DocType) -> Result<Option<Document>> {
        Ok(self.ledger.read().latest(&self.address, doc_type).cloned())
    }

    async fn document_at(&self, doc_type: DocType, version: u32) -> Result<Option<Document>> {
        Ok(self.ledger.read().at(&self.address, doc_type, version).cloned())
    }

    async fn document_count(&self, doc_type: DocType) -> Result<u32> {
        Ok(self.ledger.read().count(&self.address, doc_type))
    }

    async fn verify_document(&self, doc_type: DocType, version: u32, expected: &Digest) -> Result<bool> {
        Ok(self
            .ledger
            .read()
            .verify(&self.address, doc_type, version, expected))
    }

    async fn grant_access(&self, reader: &AgentAddress, doc_type: DocType) -> Result<TxHash> {
        self.ledger.write().grant(self.address, *reader, doc_type)?;
        Ok(self.ledger.next_tx(&self.address))
    }

    async fn revoke_access(&self, reader: &AgentAddress, doc_type: DocType) -> Result<TxHash> {
        self.ledger.write().revoke(self.address, *reader, doc_type)?;
        Ok(self.ledger.next_tx(&self.address))
    }

    async fn has_access(&self, agent: &AgentAddress, reader: &AgentAddress, doc_type: DocType) -> Result<bool> {
        Ok(self.ledger.read().has_access(agent, reader, doc_type))
    }

    async fn latest_document_of(&self, agent: &AgentAddress, doc_type: DocType) -> Result<Option<Document>> {
        let state = self.ledger.read();
        Ok(state.latest_for(&self.address, agent, doc_type)?.cloned())
    }

    async fn document_of_at(
        &self,
        agent: &AgentAddress,
        doc_type: DocType,
        version: u32,
    ) -> Result<Option<Document>> {
        let state = self.ledger.read();
        Ok(state.at_for(&self.address, agent, doc_type, version)?.cloned())
    }

    async fn register_child(&self, child: &AgentAddress) -> Result<TxHash> {
        self.ledger.write().register_child(self.address, *child)?;
        Ok(self.ledger.next_tx(&self.address))
    }

    async fn get_children(&self, agent: &AgentAddress) -> Result<Vec<AgentAddress>> {
        Ok(self.ledger.read().children(agent))
    }

    async fn get_parent(&self, agent: &AgentAddress) -> Result<Option<AgentAddress>> {
        Ok(self.ledger.read().parent(agent))
    }

    async fn store_access_key(&self, reader: &AgentAddress, doc_type: DocType, key: Vec<u8>) -> Result<TxHash> {
        self.ledger
            .write()
            .store_access_key(self.address, *reader, doc_type, key)?;
        Ok(self.ledger.next_tx(&self.address))
    }

    async fn get_access_key(
        &self,
        owner: &AgentAddress,
        reader: &AgentAddress,
        doc_type: DocType,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.ledger.read().access_key(owner, reader, doc_type).cloned())
    }

    async fn remove_access_key(&self, reader: &AgentAddress, doc_type: DocType) -> Result<TxHash> {
        self.ledger
            .write()
            .remove_access_key(self.address, *reader, doc_type)?;
        Ok(self.ledger.next_tx(&self.address))
    }
}
