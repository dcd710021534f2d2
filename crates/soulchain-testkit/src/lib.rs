//! # SoulChain Testkit
//!
//! Testing utilities for SoulChain.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: agents sharing an in-memory ledger and blob store, each
//!   with its own temporary workspace, plus storage that fails on demand
//! - **Generators**: proptest strategies for identities, document types,
//!   paths and write sequences
//!
//! The cross-crate scenarios live in this crate's `tests/` directory.
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use soulchain_testkit::TestNetwork;
//!
//! async fn example() {
//!     let net = TestNetwork::new();
//!     let agent = net.agent().await;
//!     let receipt = agent.write("SOUL.md", b"# soul").await;
//!     assert_eq!(receipt.version, 0);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use soulchain_testkit::generators::WriteSequence;
//!
//! proptest! {
//!     #[test]
//!     fn versions_are_dense(seq: WriteSequence) {
//!         // write seq.versions in order, then check the ledger
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, FlakyStorage, MemoryEngine, TestAgent, TestNetwork};
pub use generators::WriteSequence;
