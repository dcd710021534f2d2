//! HKDF-SHA256 key derivation from an agent's root secret.
//!
//! Every key an agent uses is derived from one 32-byte master secret with a
//! distinct `info` string, so the derived keys are independent of each other.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::cipher::{SymmetricKey, KEY_LEN};
use crate::error::{CoreError, Result};
use crate::types::DocType;

/// Info string for the key protecting queued payloads at rest.
pub const STAGING_INFO: &[u8] = b"soulchain-staging-key";

/// Expand `master` into 32 bytes of key material for `info`.
///
/// No salt is used. The output is wiped on drop.
pub fn derive_key(master: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, master);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| CoreError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// The symmetric key for one version of one document type.
///
/// Info is `"<doc-type>:<version>"`, e.g. `"memory:3"`.
pub fn derive_document_key(master: &[u8], doc_type: DocType, version: u32) -> Result<SymmetricKey> {
    let info = format!("{}:{}", doc_type.name(), version);
    let okm = derive_key(master, info.as_bytes())?;
    Ok(SymmetricKey::from_bytes(*okm))
}

/// The key that seals queued payloads before they touch disk.
pub fn derive_staging_key(master: &[u8]) -> Result<SymmetricKey> {
    let okm = derive_key(master, STAGING_INFO)?;
    Ok(SymmetricKey::from_bytes(*okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: [u8; 32] = [0x11; 32];

    #[test]
    fn test_document_key_deterministic() {
        let a = derive_document_key(&MASTER, DocType::Memory, 2).unwrap();
        let b = derive_document_key(&MASTER, DocType::Memory, 2).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_document_keys_are_separated() {
        let v0 = derive_document_key(&MASTER, DocType::Memory, 0).unwrap();
        let v1 = derive_document_key(&MASTER, DocType::Memory, 1).unwrap();
        let other = derive_document_key(&MASTER, DocType::Soul, 0).unwrap();
        let staging = derive_staging_key(&MASTER).unwrap();

        assert_ne!(v0.as_bytes(), v1.as_bytes());
        assert_ne!(v0.as_bytes(), other.as_bytes());
        assert_ne!(v0.as_bytes(), staging.as_bytes());
    }

    #[test]
    fn test_document_key_matches_info_format() {
        let direct = derive_key(&MASTER, b"love_map:7").unwrap();
        let key = derive_document_key(&MASTER, DocType::LoveMap, 7).unwrap();
        assert_eq!(key.as_bytes(), &*direct);
    }

    #[test]
    fn test_different_masters_differ() {
        let a = derive_document_key(&[1u8; 32], DocType::Soul, 0).unwrap();
        let b = derive_document_key(&[2u8; 32], DocType::Soul, 0).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
