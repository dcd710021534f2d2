//! Passphrase-protected storage for an agent's root secret.
//!
//! The root secret is encrypted under a key stretched from the passphrase
//! with Argon2id (64 MiB, 3 passes, 1 lane) and a fresh 32-byte salt. The
//! serialized form is JSON with hex fields:
//!
//! ```json
//! {"version":1,"algorithm":"argon2id","salt":"..","iv":"..","ciphertext":"..","tag":".."}
//! ```
//!
//! A wrong passphrase and a corrupted file both surface as
//! [`CoreError::Authentication`]; the two cases are indistinguishable.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::cipher::{self, Encrypted, SymmetricKey, IV_LEN, KEY_LEN, TAG_LEN};
use crate::error::{CoreError, Result};

pub const KEYSTORE_VERSION: u32 = 1;
pub const KEYSTORE_ALGORITHM: &str = "argon2id";

/// Argon2id memory cost in KiB.
pub const ARGON2_MEMORY_KIB: u32 = 65536;
pub const ARGON2_ITERATIONS: u32 = 3;
pub const ARGON2_PARALLELISM: u32 = 1;
pub const SALT_LEN: usize = 32;

/// An encrypted root secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keystore {
    pub version: u32,
    pub algorithm: String,
    pub salt: String,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
}

fn stretch(passphrase: &str, salt: &[u8]) -> Result<SymmetricKey> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(KEY_LEN),
    )
    .map_err(|e| CoreError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| CoreError::KeyDerivation(e.to_string()))?;
    Ok(SymmetricKey::from_bytes(*key))
}

fn hex_field<const N: usize>(value: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value).map_err(|_| CoreError::Authentication)?;
    bytes.try_into().map_err(|_| CoreError::Authentication)
}

impl Keystore {
    /// Encrypt `secret` under `passphrase`.
    ///
    /// This is deliberately slow (Argon2id); call it off the async runtime.
    pub fn create(secret: &[u8], passphrase: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let key = stretch(passphrase, &salt)?;
        let encrypted = cipher::encrypt(secret, &key)?;

        Ok(Self {
            version: KEYSTORE_VERSION,
            algorithm: KEYSTORE_ALGORITHM.to_string(),
            salt: hex::encode(salt),
            iv: hex::encode(encrypted.iv),
            ciphertext: hex::encode(&encrypted.ciphertext),
            tag: hex::encode(encrypted.tag),
        })
    }

    /// Recover the secret.
    ///
    /// Unknown versions or algorithms are rejected before any key
    /// stretching happens.
    pub fn unlock(&self, passphrase: &str) -> Result<Zeroizing<Vec<u8>>> {
        if self.version != KEYSTORE_VERSION {
            return Err(CoreError::UnsupportedKeystore(format!(
                "version {}",
                self.version
            )));
        }
        if self.algorithm != KEYSTORE_ALGORITHM {
            return Err(CoreError::UnsupportedKeystore(format!(
                "algorithm {}",
                self.algorithm
            )));
        }

        let salt = hex::decode(&self.salt).map_err(|_| CoreError::Authentication)?;
        if salt.len() < 8 {
            return Err(CoreError::Authentication);
        }
        let encrypted = Encrypted {
            ciphertext: hex::decode(&self.ciphertext).map_err(|_| CoreError::Authentication)?,
            iv: hex_field::<IV_LEN>(&self.iv)?,
            tag: hex_field::<TAG_LEN>(&self.tag)?,
        };

        let key = stretch(passphrase, &salt)?;
        cipher::decrypt(&encrypted, &key).map(Zeroizing::new)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}
