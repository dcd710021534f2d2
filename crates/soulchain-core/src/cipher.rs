//! Symmetric document encryption.
//!
//! ChaCha20-Poly1305 with a fresh 96-bit nonce per call and a detached
//! 128-bit tag. Encrypted blobs are framed as `iv(12) ‖ tag(16) ‖ ciphertext`
//! before they leave the process.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, Result};

/// Nonce length in bytes.
pub const IV_LEN: usize = 12;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Key length in bytes.
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CoreError::InvalidKeyLength {
            expected: KEY_LEN,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// The three parts of an encrypted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypted {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
}

impl Encrypted {
    /// Frame as `iv ‖ tag ‖ ciphertext`, the form stored off-ledger.
    pub fn to_framed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LEN + TAG_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split a framed blob. Blobs shorter than the header are rejected.
    pub fn from_framed(blob: &[u8]) -> Result<Self> {
        if blob.len() < IV_LEN + TAG_LEN {
            return Err(CoreError::MalformedBlob(format!(
                "framed blob is {} bytes, need at least {}",
                blob.len(),
                IV_LEN + TAG_LEN
            )));
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&blob[..IV_LEN]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&blob[IV_LEN..IV_LEN + TAG_LEN]);
        Ok(Self {
            ciphertext: blob[IV_LEN + TAG_LEN..].to_vec(),
            iv,
            tag,
        })
    }
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<Encrypted> {
    encrypt_with_aad(plaintext, key, &[])
}

/// Encrypt with associated data bound into the tag.
pub fn encrypt_with_aad(plaintext: &[u8], key: &SymmetricKey, aad: &[u8]) -> Result<Encrypted> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = key
        .cipher()
        .encrypt_in_place_detached(Nonce::from_slice(&iv), aad, &mut buffer)
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok(Encrypted {
        ciphertext: buffer,
        iv,
        tag: tag_bytes,
    })
}

/// Decrypt; the exact inverse of [`encrypt`].
///
/// Fails with [`CoreError::Authentication`] on any tag mismatch.
pub fn decrypt(encrypted: &Encrypted, key: &SymmetricKey) -> Result<Vec<u8>> {
    decrypt_with_aad(encrypted, key, &[])
}

/// Decrypt with associated data.
pub fn decrypt_with_aad(encrypted: &Encrypted, key: &SymmetricKey, aad: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = encrypted.ciphertext.clone();
    key.cipher()
        .decrypt_in_place_detached(
            Nonce::from_slice(&encrypted.iv),
            aad,
            &mut buffer,
            Tag::from_slice(&encrypted.tag),
        )
        .map_err(|_| CoreError::Authentication)?;
    Ok(buffer)
}
