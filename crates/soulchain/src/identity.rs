//! Keystore files: provisioning and unlocking an agent identity.
//!
//! The keystore holds the agent's 32-byte root secret. The Ed25519 keypair,
//! the agreement key and every document key derive from it. Argon2id work
//! runs on the blocking pool.

use std::path::Path;

use tracing::info;

use soulchain_core::{Keypair, Keystore};

use crate::error::{Result, SoulError};

/// Workspace-relative location of an imported keystore.
pub const WORKSPACE_KEYSTORE: &str = ".soulchain/keystore.json";

pub async fn read_keystore(path: &Path) -> Result<Keystore> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SoulError::NotFound(format!("keystore at {}", path.display())));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Keystore::from_json(&raw)?)
}

pub async fn write_keystore(path: &Path, keystore: &Keystore) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, keystore.to_json()?).await?;
    Ok(())
}

/// Generate a new identity and save it, encrypted, at `path`.
///
/// Refuses to overwrite an existing keystore.
pub async fn create_identity(path: &Path, passphrase: &str) -> Result<Keypair> {
    if tokio::fs::try_exists(path).await? {
        return Err(SoulError::Config(format!(
            "keystore already exists at {}",
            path.display()
        )));
    }

    let keypair = Keypair::generate();
    let seed = keypair.seed();
    let passphrase = passphrase.to_string();
    let keystore = tokio::task::spawn_blocking(move || Keystore::create(&seed[..], &passphrase)).await??;

    write_keystore(path, &keystore).await?;
    info!(agent = %keypair.address(), path = %path.display(), "created identity");
    Ok(keypair)
}

/// Decrypt the keystore at `path`.
///
/// A wrong passphrase and a corrupted file both fail with an
/// authentication error.
pub async fn unlock_identity(path: &Path, passphrase: &str) -> Result<Keypair> {
    let keystore = read_keystore(path).await?;
    let passphrase = passphrase.to_string();
    let secret = tokio::task::spawn_blocking(move || keystore.unlock(&passphrase)).await??;
    Ok(Keypair::from_seed_slice(&secret)?)
}

/// Unlock the keystore at `path`, creating it first if there is none.
pub async fn load_or_create_identity(path: &Path, passphrase: &str) -> Result<Keypair> {
    if tokio::fs::try_exists(path).await? {
        unlock_identity(path, passphrase).await
    } else {
        create_identity(path, passphrase).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[tokio::test]
    async fn test_create_then_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/keystore.json");

        let created = create_identity(&path, "pw1").await.unwrap();
        let unlocked = unlock_identity(&path, "pw1").await.unwrap();
        assert_eq!(created.address(), unlocked.address());

        let err = unlock_identity(&path, "wrong").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Authentication);

        assert!(create_identity(&path, "pw2").await.is_err());
        let again = load_or_create_identity(&path, "pw1").await.unwrap();
        assert_eq!(again.address(), created.address());
    }

    #[tokio::test]
    async fn test_missing_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let err = unlock_identity(&dir.path().join("none.json"), "pw").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn test_unsupported_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keystore.json");
        create_identity(&path, "pw").await.unwrap();

        let mut keystore = read_keystore(&path).await.unwrap();
        keystore.algorithm = "scrypt".into();
        write_keystore(&path, &keystore).await.unwrap();

        let err = unlock_identity(&path, "pw").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
    }
}
