//! X25519 key agreement derived from an agent's root secret.
//!
//! The agreement keypair is a deterministic function of the root secret, so
//! an agent that can unlock its keystore can always re-derive it. Its public
//! half is published on the ledger at registration time.

use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

use soulchain_core::{derive_key, SymmetricKey};

use crate::error::{AccessError, Result};

/// HKDF info for the agreement secret. Distinct from every document key.
pub const AGREEMENT_INFO: &[u8] = b"soulchain-x25519-key";

/// HKDF info applied to the raw ECDH output.
pub const SHARED_ACCESS_INFO: &[u8] = b"soulchain-shared-access";

/// An X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgreementPublicKey(pub [u8; 32]);

impl AgreementPublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for AgreementPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Pub({})", &self.to_hex()[..16])
    }
}

impl From<PublicKey> for AgreementPublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// An X25519 static secret. Zeroized on drop by x25519-dalek.
pub struct AgreementSecret(StaticSecret);

impl AgreementSecret {
    /// Derive the agreement secret from an agent's root secret.
    pub fn derive(master: &[u8]) -> Result<Self> {
        let okm = derive_key(master, AGREEMENT_INFO)?;
        Ok(Self(StaticSecret::from(*okm)))
    }

    pub fn public_key(&self) -> AgreementPublicKey {
        AgreementPublicKey::from(PublicKey::from(&self.0))
    }

    /// Derive the symmetric key shared with `peer`.
    ///
    /// `owner.shared_key(reader_pub)` equals `reader.shared_key(owner_pub)`.
    /// Low-order peer keys, which would force a predictable secret, are
    /// rejected.
    pub fn shared_key(&self, peer: &AgreementPublicKey) -> Result<SymmetricKey> {
        let shared = self.0.diffie_hellman(&peer.to_dalek());
        if !shared.was_contributory() {
            return Err(AccessError::InvalidAgreementKey(
                "non-contributory key agreement".into(),
            ));
        }
        let okm = derive_key(shared.as_bytes(), SHARED_ACCESS_INFO)?;
        Ok(SymmetricKey::from_bytes(*okm))
    }
}

impl fmt::Debug for AgreementSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgreementSecret({:?})", self.public_key())
    }
}
