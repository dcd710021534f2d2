//! # SoulChain Core
//!
//! Pure primitives for SoulChain: document records, signing, symmetric
//! encryption, key derivation and passphrase keystores.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Document`] - One immutable, versioned entry in an agent's log
//! - [`DocType`] - The closed vocabulary of document categories
//! - [`AgentAddress`] - An agent's ledger identity (its Ed25519 public key)
//! - [`Keypair`] - The signing identity derived from the root secret
//! - [`Keystore`] - The Argon2id-protected root secret at rest
//! - [`Encrypted`] - An AEAD ciphertext with its IV and tag
//!
//! ## Usage
//!
//! ```rust
//! use soulchain_core::{cipher, derive_document_key, DocType, Encrypted, Keypair};
//!
//! let keypair = Keypair::generate();
//! let key = derive_document_key(&*keypair.seed(), DocType::Memory, 0).unwrap();
//!
//! let framed = cipher::encrypt(b"remember this", &key).unwrap().to_framed();
//! let opened = cipher::decrypt(&Encrypted::from_framed(&framed).unwrap(), &key).unwrap();
//! assert_eq!(opened, b"remember this");
//! ```

pub mod cipher;
pub mod crypto;
pub mod error;
pub mod kdf;
pub mod keystore;
pub mod types;
pub mod validation;

pub use cipher::{Encrypted, SymmetricKey};
pub use crypto::{AgentAddress, Digest, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, Result, ValidationError};
pub use kdf::{derive_document_key, derive_key, derive_staging_key};
pub use keystore::Keystore;
pub use types::{DocType, Document, DocumentWrite, StorageRef};
pub use validation::{validate_history, verify_document_signature};

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
