//! In-process ledger node.
//!
//! [`LocalNode`] implements [`LedgerClient`] directly over a
//! [`MemoryLedger`], enforcing what a real node would: sender signatures
//! and strictly increasing per-sender nonces. It lets [`LedgerChain`] run
//! end to end without a network, and it shares state with any
//! [`MemoryChain`] handles on the same ledger.
//!
//! [`LedgerChain`]: crate::ledger::LedgerChain
//! [`MemoryChain`]: crate::memory::MemoryChain

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use soulchain_access::AgreementPublicKey;
use soulchain_core::{now_millis, AgentAddress, DocType, DocumentWrite, Ed25519Signature, StorageRef};

use crate::codec::{LedgerCall, LedgerDocument, LedgerQuery, QueryResponse, SignedTransaction, TxReceipt};
use crate::error::{ChainError, Result};
use crate::ledger::LedgerClient;
use crate::memory::MemoryLedger;

fn doc_type(value: u8) -> Result<DocType> {
    DocType::from_u8(value).ok_or_else(|| ChainError::Rejected(format!("unknown doc type {value}")))
}

/// A ledger node running in this process.
pub struct LocalNode {
    ledger: MemoryLedger,
    nonces: Mutex<HashMap<AgentAddress, u64>>,
}

impl LocalNode {
    pub fn new(ledger: MemoryLedger) -> Self {
        Self {
            ledger,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }

    fn execute(&self, from: AgentAddress, call: LedgerCall) -> Result<Option<u32>> {
        let now = now_millis();
        let mut state = self.ledger.write();
        match call {
            LedgerCall::RegisterSoul { agreement_key } => {
                state.register(from, AgreementPublicKey::from_bytes(agreement_key), now)?;
                Ok(None)
            }
            LedgerCall::WriteDocument {
                doc_type: t,
                content_hash,
                encrypted_hash,
                storage_ref,
                signature,
            } => {
                let signature = Ed25519Signature::try_from(signature.as_slice())
                    .map_err(|e| ChainError::Rejected(e.to_string()))?;
                let write = DocumentWrite {
                    doc_type: doc_type(t)?,
                    content_hash: content_hash.into(),
                    encrypted_hash: encrypted_hash.into(),
                    storage_ref: StorageRef::new(storage_ref),
                    signature,
                };
                let document = state.append(from, write, now)?;
                Ok(Some(document.version))
            }
            LedgerCall::GrantAccess { reader, doc_type: t } => {
                state.grant(from, reader, doc_type(t)?)?;
                Ok(None)
            }
            LedgerCall::RevokeAccess { reader, doc_type: t } => {
                state.revoke(from, reader, doc_type(t)?)?;
                Ok(None)
            }
            LedgerCall::RegisterChild { child } => {
                state.register_child(from, child)?;
                Ok(None)
            }
            LedgerCall::StoreAccessKey { reader, doc_type: t, key } => {
                state.store_access_key(from, reader, doc_type(t)?, key)?;
                Ok(None)
            }
            LedgerCall::RemoveAccessKey { reader, doc_type: t } => {
                state.remove_access_key(from, reader, doc_type(t)?)?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl LedgerClient for LocalNode {
    async fn submit(&self, tx: SignedTransaction) -> Result<TxReceipt> {
        let tx_hash = tx.tx_hash();
        let transaction = tx.open()?;

        // Nonce check and execution happen under one lock so a sender's
        // transactions apply in nonce order.
        let mut nonces = self.nonces.lock().unwrap_or_else(PoisonError::into_inner);
        let expected = nonces.get(&transaction.from).copied().unwrap_or(0);
        if transaction.nonce != expected {
            return Err(ChainError::NonceMismatch {
                expected,
                got: transaction.nonce,
            });
        }

        let version = self.execute(transaction.from, transaction.call)?;
        nonces.insert(transaction.from, expected + 1);
        debug!(from = %transaction.from, nonce = expected, "applied transaction");

        Ok(TxReceipt { tx_hash, version })
    }

    async fn query(&self, query: LedgerQuery) -> Result<QueryResponse> {
        // Each arm takes its own guard; the nonce lock is never taken while
        // the state lock is held.
        let state = || self.ledger.read();
        let response = match query {
            LedgerQuery::NextNonce { agent } => {
                let nonces = self.nonces.lock().unwrap_or_else(PoisonError::into_inner);
                QueryResponse::Nonce(nonces.get(&agent).copied().unwrap_or(0))
            }
            LedgerQuery::IsRegistered { agent } => QueryResponse::Bool(state().is_registered(&agent)),
            LedgerQuery::AgreementKey { agent } => {
                QueryResponse::Key(state().soul(&agent).map(|s| *s.agreement_key.as_bytes()))
            }
            LedgerQuery::LatestDocument { caller, agent, doc_type: t } => QueryResponse::Document(
                state()
                    .latest_for(&caller, &agent, doc_type(t)?)?
                    .map(LedgerDocument::from),
            ),
            LedgerQuery::DocumentAt {
                caller,
                agent,
                doc_type: t,
                version,
            } => QueryResponse::Document(
                state()
                    .at_for(&caller, &agent, doc_type(t)?, version)?
                    .map(LedgerDocument::from),
            ),
            LedgerQuery::DocumentCount { agent, doc_type: t } => {
                QueryResponse::Count(state().count(&agent, doc_type(t)?))
            }
            LedgerQuery::VerifyDocument {
                agent,
                doc_type: t,
                version,
                expected,
            } => QueryResponse::Bool(state().verify(&agent, doc_type(t)?, version, &expected.into())),
            LedgerQuery::HasAccess { agent, reader, doc_type: t } => {
                QueryResponse::Bool(state().has_access(&agent, &reader, doc_type(t)?))
            }
            LedgerQuery::Children { agent } => QueryResponse::Agents(state().children(&agent)),
            LedgerQuery::Parent { agent } => QueryResponse::Agent(state().parent(&agent)),
            LedgerQuery::AccessKey { owner, reader, doc_type: t } => {
                QueryResponse::Bytes(state().access_key(&owner, &reader, doc_type(t)?).cloned())
            }
        };
        Ok(response)
    }
}
