//! # SoulChain Access
//!
//! Selective disclosure of encrypted documents.
//!
//! ## Overview
//!
//! Documents are encrypted under per-version symmetric keys derived from the
//! owner's root secret. To let a reader decrypt one document type, the owner
//! re-encrypts that key for the reader:
//!
//! 1. Both parties derive an X25519 agreement keypair from their root secret
//! 2. ECDH plus HKDF gives a shared key unique to the (owner, reader) pair
//! 3. The document key is wrapped under the shared key as an [`AccessKey`]
//! 4. The reader re-derives the shared key and unwraps the document key
//!
//! The document ciphertext is never touched, and every reader's wrapper is
//! independent. Revoking a reader deletes its wrapper; it does not rotate
//! keys already issued.
//!
//! ## Usage
//!
//! ```rust
//! use soulchain_access::{AccessKey, AgreementSecret};
//! use soulchain_core::{DocType, SymmetricKey};
//!
//! let owner = AgreementSecret::derive(&[1u8; 32]).unwrap();
//! let reader = AgreementSecret::derive(&[2u8; 32]).unwrap();
//! let document_key = SymmetricKey::generate();
//!
//! let access = AccessKey::issue(&owner, &reader.public_key(), DocType::Soul, 0, &document_key).unwrap();
//! let unwrapped = access.open(&reader, &owner.public_key(), DocType::Soul).unwrap();
//! assert_eq!(unwrapped.as_bytes(), document_key.as_bytes());
//! ```

pub mod access_key;
pub mod agreement;
pub mod error;

pub use access_key::AccessKey;
pub use agreement::{AgreementPublicKey, AgreementSecret};
pub use error::{AccessError, Result};
