//! # SoulChain Chain
//!
//! The ledger abstraction: an append-only, per-agent document log with
//! access grants, wrapped access keys and a parent/child agent tree.
//!
//! ## Overview
//!
//! Everything above this crate talks to the ledger through the
//! [`ChainProvider`] trait. Two adapters ship with it:
//!
//! - [`MemoryChain`] - handles onto a shared in-memory [`MemoryLedger`]
//! - [`LedgerChain`] - an external ledger reached through a [`LedgerClient`],
//!   with signed CBOR transactions and per-identity nonce sequencing
//!
//! [`LocalNode`] is a [`LedgerClient`] that runs the ledger rules in process,
//! so `LedgerChain` can be exercised without a network.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use soulchain_chain::{ChainProvider, MemoryLedger};
//! use soulchain_access::AgreementSecret;
//! use soulchain_core::Keypair;
//!
//! async fn example() {
//!     let ledger = MemoryLedger::new();
//!     let keypair = Keypair::generate();
//!     let chain = ledger.connect(keypair.address());
//!
//!     let agreement = AgreementSecret::derive(&*keypair.seed()).unwrap();
//!     chain.register_soul(agreement.public_key()).await.unwrap();
//! }
//! ```

pub mod codec;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod network;
pub mod node;
pub mod provider;
pub mod state;

pub use codec::{Bytes32, LedgerCall, LedgerQuery, QueryResponse, SignedTransaction, Transaction, TxReceipt};
pub use error::{ChainError, Result};
pub use ledger::{LedgerChain, LedgerClient};
pub use memory::{MemoryChain, MemoryLedger};
pub use network::{network, Network, NETWORKS};
pub use node::LocalNode;
pub use provider::{Anchor, ChainProvider, TxHash};
pub use state::LedgerState;
