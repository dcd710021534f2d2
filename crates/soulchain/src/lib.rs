//! # SoulChain
//!
//! Verifiable, versioned, encrypted memory for AI agents.
//!
//! ## Overview
//!
//! An agent's identity files (`SOUL.md`, `MEMORY.md`, ...) are hashed,
//! signed, encrypted under a per-document key, uploaded as blobs and
//! anchored on a ledger as an append-only, hash-chained version log.
//! Reads verify the chain back down to the plaintext, so a tampered blob or
//! a tampered local file is detected rather than trusted.
//!
//! ## Key Types
//!
//! - [`SyncEngine`] - write, verify, restore, share and lineage operations
//! - [`SyncWorker`] - drains the durable [`SyncQueue`](store::SyncQueue) in the background
//! - [`SoulConfig`] - the workspace `soulchain.config.json`
//! - [`Bundle`] - portable export of a workspace and its keystore
//! - [`SoulError`] / [`ErrorClass`] - one error type, classified for callers
//!
//! The building blocks are re-exported as [`core`], [`access`], [`chain`] and
//! [`store`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use soulchain::chain::MemoryLedger;
//! use soulchain::store::MemoryBlobStore;
//! use soulchain::{create_identity, EngineConfig, SyncEngine};
//!
//! async fn example() -> soulchain::Result<()> {
//!     let keypair = create_identity("keystore.json".as_ref(), "passphrase").await?;
//!     let chain = MemoryLedger::new().connect(keypair.address());
//!     let engine = SyncEngine::new(chain, MemoryBlobStore::new(), keypair, EngineConfig::new("."))?;
//!
//!     engine.register().await?;
//!     let receipt = engine.on_file_write("SOUL.md", b"# Who I am").await?;
//!     assert_eq!(receipt.version, 0);
//!     assert!(engine.verify_integrity().await?.is_clean());
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod sealer;
pub mod worker;

pub use soulchain_access as access;
pub use soulchain_chain as chain;
pub use soulchain_core as core;
pub use soulchain_store as store;

pub use bundle::{export_bundle, import_bundle, Bundle, BundleFile, ImportReport, BUNDLE_VERSION};
pub use classify::resolve_doc_type;
pub use config::{
    ChainConfig, ChainKind, ChainSetting, EngineConfig, SoulConfig, StorageKind, SyncMode, WorkerConfig,
    CONFIG_FILE,
};
pub use engine::{
    EngineStatus, IntegrityReport, MigrationReport, SyncEngine, SyncPhase, WriteOutcome, WriteReceipt,
};
pub use error::{ErrorClass, Result, SoulError};
pub use identity::{create_identity, load_or_create_identity, unlock_identity};
pub use sealer::{Sealed, Sealer};
pub use worker::{SyncCallback, SyncOutcome, SyncWorker, TickReport, WorkerHandle};
