//! Per-reader access keys.
//!
//! An access key is a document's symmetric key re-encrypted under the
//! shared key of one (owner, reader) pair. The owner never re-encrypts the
//! document itself; each reader gets an independent key wrapper.
//!
//! Wire layout: `nonce(12) ‖ version(u32 BE) ‖ ciphertext ‖ tag(16)`.
//! The doc type and version are bound into the AEAD as associated data.

use soulchain_core::cipher::{self, Encrypted, IV_LEN, KEY_LEN, TAG_LEN};
use soulchain_core::{CoreError, DocType, SymmetricKey};

use crate::agreement::{AgreementPublicKey, AgreementSecret};
use crate::error::{AccessError, Result};

const VERSION_LEN: usize = 4;

/// Minimum serialized length: nonce, version and tag around an empty body.
pub const MIN_ACCESS_KEY_LEN: usize = IV_LEN + VERSION_LEN + TAG_LEN;

/// A document key wrapped for a single reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKey {
    pub nonce: [u8; IV_LEN],
    /// The document version this key decrypts.
    pub version: u32,
    /// Wrapped symmetric key, tag appended.
    pub encrypted_sym_key: Vec<u8>,
}

fn associated_data(doc_type: DocType, version: u32) -> [u8; 5] {
    let v = version.to_be_bytes();
    [doc_type.as_u8(), v[0], v[1], v[2], v[3]]
}

impl AccessKey {
    /// Wrap `document_key` for `reader`.
    pub fn issue(
        owner: &AgreementSecret,
        reader: &AgreementPublicKey,
        doc_type: DocType,
        version: u32,
        document_key: &SymmetricKey,
    ) -> Result<Self> {
        let shared = owner.shared_key(reader)?;
        let aad = associated_data(doc_type, version);
        let encrypted = cipher::encrypt_with_aad(document_key.as_bytes(), &shared, &aad)?;

        let mut encrypted_sym_key = encrypted.ciphertext;
        encrypted_sym_key.extend_from_slice(&encrypted.tag);
        Ok(Self {
            nonce: encrypted.iv,
            version,
            encrypted_sym_key,
        })
    }

    /// Recover the document key as `reader`.
    pub fn open(
        &self,
        reader: &AgreementSecret,
        owner: &AgreementPublicKey,
        doc_type: DocType,
    ) -> Result<SymmetricKey> {
        if self.encrypted_sym_key.len() < TAG_LEN {
            return Err(AccessError::Malformed("wrapped key shorter than tag".into()));
        }
        let split = self.encrypted_sym_key.len() - TAG_LEN;
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&self.encrypted_sym_key[split..]);
        let encrypted = Encrypted {
            ciphertext: self.encrypted_sym_key[..split].to_vec(),
            iv: self.nonce,
            tag,
        };

        let shared = reader.shared_key(owner)?;
        let aad = associated_data(doc_type, self.version);
        let key_bytes = cipher::decrypt_with_aad(&encrypted, &shared, &aad).map_err(|e| match e {
            CoreError::Authentication => AccessError::Decryption,
            other => AccessError::Core(other),
        })?;
        if key_bytes.len() != KEY_LEN {
            return Err(AccessError::Malformed(format!(
                "unwrapped key is {} bytes",
                key_bytes.len()
            )));
        }
        Ok(SymmetricKey::from_slice(&key_bytes)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LEN + VERSION_LEN + self.encrypted_sym_key.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.encrypted_sym_key);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_ACCESS_KEY_LEN {
            return Err(AccessError::Malformed(format!(
                "access key is {} bytes, need at least {}",
                bytes.len(),
                MIN_ACCESS_KEY_LEN
            )));
        }
        let mut nonce = [0u8; IV_LEN];
        nonce.copy_from_slice(&bytes[..IV_LEN]);
        let mut version = [0u8; VERSION_LEN];
        version.copy_from_slice(&bytes[IV_LEN..IV_LEN + VERSION_LEN]);
        Ok(Self {
            nonce,
            version: u32::from_be_bytes(version),
            encrypted_sym_key: bytes[IV_LEN + VERSION_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parties() -> (AgreementSecret, AgreementSecret, AgreementSecret) {
        (
            AgreementSecret::derive(&[1u8; 32]).unwrap(),
            AgreementSecret::derive(&[2u8; 32]).unwrap(),
            AgreementSecret::derive(&[3u8; 32]).unwrap(),
        )
    }

    #[test]
    fn test_issue_open() {
        let (owner, reader, _) = parties();
        let document_key = SymmetricKey::generate();

        let access = AccessKey::issue(
            &owner,
            &reader.public_key(),
            DocType::Memory,
            4,
            &document_key,
        )
        .unwrap();
        let bytes = access.to_bytes();
        assert_eq!(bytes.len(), IV_LEN + VERSION_LEN + KEY_LEN + TAG_LEN);

        let parsed = AccessKey::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.version, 4);
        let opened = parsed
            .open(&reader, &owner.public_key(), DocType::Memory)
            .unwrap();
        assert_eq!(opened.as_bytes(), document_key.as_bytes());
    }

    #[test]
    fn test_other_reader_cannot_open() {
        let (owner, reader, stranger) = parties();
        let access = AccessKey::issue(
            &owner,
            &reader.public_key(),
            DocType::Soul,
            0,
            &SymmetricKey::generate(),
        )
        .unwrap();

        assert!(matches!(
            access.open(&stranger, &owner.public_key(), DocType::Soul),
            Err(AccessError::Decryption)
        ));
    }

    #[test]
    fn test_doc_type_and_version_are_bound() {
        let (owner, reader, _) = parties();
        let mut access = AccessKey::issue(
            &owner,
            &reader.public_key(),
            DocType::Soul,
            1,
            &SymmetricKey::generate(),
        )
        .unwrap();

        assert!(access
            .open(&reader, &owner.public_key(), DocType::Memory)
            .is_err());

        access.version = 2;
        assert!(access
            .open(&reader, &owner.public_key(), DocType::Soul)
            .is_err());
    }

    #[test]
    fn test_readers_get_independent_wrappers() {
        let (owner, r1, r2) = parties();
        let key = SymmetricKey::generate();
        let a1 = AccessKey::issue(&owner, &r1.public_key(), DocType::Soul, 0, &key).unwrap();
        let a2 = AccessKey::issue(&owner, &r2.public_key(), DocType::Soul, 0, &key).unwrap();
        assert_ne!(a1.encrypted_sym_key, a2.encrypted_sym_key);
    }

    #[test]
    fn test_short_bytes_rejected() {
        assert!(matches!(
            AccessKey::from_bytes(&[0u8; MIN_ACCESS_KEY_LEN - 1]),
            Err(AccessError::Malformed(_))
        ));
    }
}
