//! External-ledger adapter.
//!
//! [`LedgerChain`] turns every [`ChainProvider`] operation into either a
//! signed transaction or a query, and hands it to a [`LedgerClient`]. The
//! client owns the transport (RPC, in-process node, ...).
//!
//! Submissions from one identity are strictly sequential: the nonce counter
//! lives behind an async mutex that is held across the whole submit, so two
//! concurrent writes can never race for the same nonce.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use soulchain_access::AgreementPublicKey;
use soulchain_core::{AgentAddress, DocType, Digest, Document, DocumentWrite, Keypair};

use crate::codec::{
    Bytes32, LedgerCall, LedgerQuery, QueryResponse, SignedTransaction, Transaction, TxReceipt,
};
use crate::error::{ChainError, Result};
use crate::network::Network;
use crate::provider::{Anchor, ChainProvider, TxHash};

/// Transport to a ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a signed transaction and wait for acceptance.
    async fn submit(&self, tx: SignedTransaction) -> Result<TxReceipt>;

    /// Run a read-only query.
    async fn query(&self, query: LedgerQuery) -> Result<QueryResponse>;
}

#[async_trait]
impl<T: LedgerClient + ?Sized> LedgerClient for std::sync::Arc<T> {
    async fn submit(&self, tx: SignedTransaction) -> Result<TxReceipt> {
        (**self).submit(tx).await
    }

    async fn query(&self, query: LedgerQuery) -> Result<QueryResponse> {
        (**self).query(query).await
    }
}

fn unexpected(response: QueryResponse) -> ChainError {
    ChainError::Codec(format!("unexpected ledger response: {response:?}"))
}

/// A [`ChainProvider`] backed by an external ledger.
pub struct LedgerChain<C: LedgerClient> {
    client: C,
    keypair: Keypair,
    network: Option<Network>,
    /// Next nonce to use; `None` until fetched or after a failed submit.
    nonce: Mutex<Option<u64>>,
}

impl<C: LedgerClient> LedgerChain<C> {
    pub fn new(client: C, keypair: Keypair) -> Self {
        Self {
            client,
            keypair,
            network: None,
            nonce: Mutex::new(None),
        }
    }

    /// Attach network metadata (used for explorer links).
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn submit(&self, call: LedgerCall) -> Result<TxReceipt> {
        let mut nonce = self.nonce.lock().await;
        let next = match *nonce {
            Some(n) => n,
            None => match self
                .client
                .query(LedgerQuery::NextNonce {
                    agent: self.keypair.address(),
                })
                .await?
            {
                QueryResponse::Nonce(n) => n,
                other => return Err(unexpected(other)),
            },
        };

        let tx = Transaction {
            from: self.keypair.address(),
            nonce: next,
            call,
        };
        let signed = tx.sign(&self.keypair)?;

        match self.client.submit(signed).await {
            Ok(receipt) => {
                *nonce = Some(next + 1);
                debug!(nonce = next, tx = %receipt.tx_hash, "transaction accepted");
                Ok(receipt)
            }
            Err(e) => {
                // Resync from the ledger on the next submit.
                *nonce = None;
                warn!(nonce = next, error = %e, "transaction failed");
                Err(e)
            }
        }
    }

    async fn query(&self, query: LedgerQuery) -> Result<QueryResponse> {
        self.client.query(query).await
    }

    async fn query_document(&self, query: LedgerQuery) -> Result<Option<Document>> {
        match self.query(query).await? {
            QueryResponse::Document(doc) => doc.map(Document::try_from).transpose(),
            other => Err(unexpected(other)),
        }
    }

    async fn query_bool(&self, query: LedgerQuery) -> Result<bool> {
        match self.query(query).await? {
            QueryResponse::Bool(b) => Ok(b),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl<C: LedgerClient> ChainProvider for LedgerChain<C> {
    fn address(&self) -> AgentAddress {
        self.keypair.address()
    }

    fn tx_url(&self, tx: &TxHash) -> Option<String> {
        self.network.as_ref().and_then(|n| n.tx_url(tx))
    }

    async fn register_soul(&self, agreement_key: AgreementPublicKey) -> Result<TxHash> {
        let receipt = self
            .submit(LedgerCall::RegisterSoul {
                agreement_key: *agreement_key.as_bytes(),
            })
            .await?;
        Ok(receipt.tx_hash)
    }

    async fn is_registered(&self, agent: &AgentAddress) -> Result<bool> {
        self.query_bool(LedgerQuery::IsRegistered { agent: *agent }).await
    }

    async fn agreement_key_of(&self, agent: &AgentAddress) -> Result<Option<AgreementPublicKey>> {
        match self.query(LedgerQuery::AgreementKey { agent: *agent }).await? {
            QueryResponse::Key(key) => Ok(key.map(AgreementPublicKey::from_bytes)),
            other => Err(unexpected(other)),
        }
    }

    async fn write_document(&self, write: DocumentWrite) -> Result<Anchor> {
        let receipt = self
            .submit(LedgerCall::WriteDocument {
                doc_type: write.doc_type.as_u8(),
                content_hash: write.content_hash.into(),
                encrypted_hash: write.encrypted_hash.into(),
                storage_ref: write.storage_ref.as_str().to_string(),
                signature: write.signature.as_bytes().to_vec(),
            })
            .await?;
        let version = receipt
            .version
            .ok_or_else(|| ChainError::Codec("write receipt without a version".into()))?;
        Ok(Anchor {
            tx: receipt.tx_hash,
            version,
        })
    }

    async fn latest_document(&self, doc_type: DocType) -> Result<Option<Document>> {
        let me = self.address();
        self.latest_document_of(&me, doc_type).await
    }

    async fn document_at(&self, doc_type: DocType, version: u32) -> Result<Option<Document>> {
        let me = self.address();
        self.document_of_at(&me, doc_type, version).await
    }

    async fn document_count(&self, doc_type: DocType) -> Result<u32> {
        let query = LedgerQuery::DocumentCount {
            agent: self.address(),
            doc_type: doc_type.as_u8(),
        };
        match self.query(query).await? {
            QueryResponse::Count(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    async fn verify_document(&self, doc_type: DocType, version: u32, expected: &Digest) -> Result<bool> {
        self.query_bool(LedgerQuery::VerifyDocument {
            agent: self.address(),
            doc_type: doc_type.as_u8(),
            version,
            expected: Bytes32::from(*expected),
        })
        .await
    }

    async fn grant_access(&self, reader: &AgentAddress, doc_type: DocType) -> Result<TxHash> {
        let receipt = self
            .submit(LedgerCall::GrantAccess {
                reader: *reader,
                doc_type: doc_type.as_u8(),
            })
            .await?;
        Ok(receipt.tx_hash)
    }

    async fn revoke_access(&self, reader: &AgentAddress, doc_type: DocType) -> Result<TxHash> {
        let receipt = self
            .submit(LedgerCall::RevokeAccess {
                reader: *reader,
                doc_type: doc_type.as_u8(),
            })
            .await?;
        Ok(receipt.tx_hash)
    }

    async fn has_access(&self, agent: &AgentAddress, reader: &AgentAddress, doc_type: DocType) -> Result<bool> {
        self.query_bool(LedgerQuery::HasAccess {
            agent: *agent,
            reader: *reader,
            doc_type: doc_type.as_u8(),
        })
        .await
    }

    async fn latest_document_of(&self, agent: &AgentAddress, doc_type: DocType) -> Result<Option<Document>> {
        self.query_document(LedgerQuery::LatestDocument {
            caller: self.address(),
            agent: *agent,
            doc_type: doc_type.as_u8(),
        })
        .await
    }

    async fn document_of_at(
        &self,
        agent: &AgentAddress,
        doc_type: DocType,
        version: u32,
    ) -> Result<Option<Document>> {
        self.query_document(LedgerQuery::DocumentAt {
            caller: self.address(),
            agent: *agent,
            doc_type: doc_type.as_u8(),
            version,
        })
        .await
    }

    async fn register_child(&self, child: &AgentAddress) -> Result<TxHash> {
        let receipt = self.submit(LedgerCall::RegisterChild { child: *child }).await?;
        Ok(receipt.tx_hash)
    }

    async fn get_children(&self, agent: &AgentAddress) -> Result<Vec<AgentAddress>> {
        match self.query(LedgerQuery::Children { agent: *agent }).await? {
            QueryResponse::Agents(agents) => Ok(agents),
            other => Err(unexpected(other)),
        }
    }

    async fn get_parent(&self, agent: &AgentAddress) -> Result<Option<AgentAddress>> {
        match self.query(LedgerQuery::Parent { agent: *agent }).await? {
            QueryResponse::Agent(parent) => Ok(parent),
            other => Err(unexpected(other)),
        }
    }

    async fn store_access_key(&self, reader: &AgentAddress, doc_type: DocType, key: Vec<u8>) -> Result<TxHash> {
        let receipt = self
            .submit(LedgerCall::StoreAccessKey {
                reader: *reader,
                doc_type: doc_type.as_u8(),
                key,
            })
            .await?;
        Ok(receipt.tx_hash)
    }

    async fn get_access_key(
        &self,
        owner: &AgentAddress,
        reader: &AgentAddress,
        doc_type: DocType,
    ) -> Result<Option<Vec<u8>>> {
        let query = LedgerQuery::AccessKey {
            owner: *owner,
            reader: *reader,
            doc_type: doc_type.as_u8(),
        };
        match self.query(query).await? {
            QueryResponse::Bytes(key) => Ok(key),
            other => Err(unexpected(other)),
        }
    }

    async fn remove_access_key(&self, reader: &AgentAddress, doc_type: DocType) -> Result<TxHash> {
        let receipt = self
            .submit(LedgerCall::RemoveAccessKey {
                reader: *reader,
                doc_type: doc_type.as_u8(),
            })
            .await?;
        Ok(receipt.tx_hash)
    }
}
