//! Encryption of document payloads with keys derived from the agent's root
//! secret.

use zeroize::Zeroizing;

use soulchain_core::cipher::{self, Encrypted};
use soulchain_core::{derive_document_key, derive_staging_key, Digest, DocType, SymmetricKey};

use crate::error::{Result, SoulError};

/// A payload ready for upload.
#[derive(Debug, Clone)]
pub struct Sealed {
    /// SHA-256 of the plaintext.
    pub content_hash: Digest,
    /// SHA-256 of `blob`.
    pub encrypted_hash: Digest,
    /// Framed `iv ‖ tag ‖ ciphertext`.
    pub blob: Vec<u8>,
}

/// Holds the root secret and seals or opens payloads with keys derived
/// from it.
pub struct Sealer {
    master: Zeroizing<[u8; 32]>,
}

impl Sealer {
    pub fn new(master: Zeroizing<[u8; 32]>) -> Self {
        Self { master }
    }

    pub fn document_key(&self, doc_type: DocType, version: u32) -> Result<SymmetricKey> {
        Ok(derive_document_key(&self.master[..], doc_type, version)?)
    }

    /// Encrypt `plaintext` as `version` of `doc_type`.
    pub fn seal(&self, doc_type: DocType, version: u32, plaintext: &[u8]) -> Result<Sealed> {
        let key = self.document_key(doc_type, version)?;
        let blob = cipher::encrypt(plaintext, &key)?.to_framed();
        Ok(Sealed {
            content_hash: Digest::sha256(plaintext),
            encrypted_hash: Digest::sha256(&blob),
            blob,
        })
    }

    /// Seal for the queue. Staged payloads are not tied to a version.
    pub fn stage(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = derive_staging_key(&self.master[..])?;
        Ok(cipher::encrypt(plaintext, &key)?.to_framed())
    }

    pub fn unstage(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let key = derive_staging_key(&self.master[..])?;
        Ok(cipher::decrypt(&Encrypted::from_framed(blob)?, &key)?)
    }
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sealer(..)")
    }
}

/// Check a downloaded blob against its anchored hash, then decrypt it.
pub fn open(key: &SymmetricKey, blob: &[u8], encrypted_hash: &Digest) -> Result<Vec<u8>> {
    let actual = Digest::sha256(blob);
    if actual != *encrypted_hash {
        return Err(SoulError::Integrity(format!(
            "blob hash {} does not match anchored {}",
            actual.to_hex(),
            encrypted_hash.to_hex()
        )));
    }
    Ok(cipher::decrypt(&Encrypted::from_framed(blob)?, key)?)
}
