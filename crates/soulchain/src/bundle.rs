//! Portable export/import of a workspace.
//!
//! A bundle carries the tracked files (base64, with their SHA-256) and the
//! encrypted keystore, so a soul can be moved to a new machine and then
//! checked against the ledger with `verify_integrity`.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::info;

use soulchain_core::{now_millis, Digest, Keystore};

use crate::config::{ChainSetting, SoulConfig, StorageKind};
use crate::error::{Result, SoulError};
use crate::identity::{read_keystore, write_keystore, WORKSPACE_KEYSTORE};

pub const BUNDLE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    /// Base64 file content.
    pub content: String,
    /// Hex SHA-256 of the decoded content.
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub version: u32,
    /// Unix ms at export.
    pub timestamp: i64,
    pub chain: ChainSetting,
    pub storage: StorageKind,
    pub files: BTreeMap<String, BundleFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystore: Option<Keystore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub files: usize,
    pub keystore: bool,
}

impl Bundle {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Collect the tracked files that exist, plus the keystore if present.
pub async fn export_bundle(workspace: &Path, config: &SoulConfig) -> Result<Bundle> {
    let mut files = BTreeMap::new();
    for tracked in &config.tracked_paths {
        match tokio::fs::read(workspace.join(tracked)).await {
            Ok(bytes) => {
                files.insert(
                    tracked.clone(),
                    BundleFile {
                        content: STANDARD.encode(&bytes),
                        hash: Digest::sha256(&bytes).to_hex(),
                    },
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    let keystore = match read_keystore(&config.keystore_path_in(workspace)).await {
        Ok(keystore) => Some(keystore),
        Err(SoulError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    info!(files = files.len(), keystore = keystore.is_some(), "exported bundle");
    Ok(Bundle {
        version: BUNDLE_VERSION,
        timestamp: now_millis(),
        chain: config.chain.clone(),
        storage: config.storage,
        files,
        keystore,
    })
}

fn is_contained(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Write a bundle's files into `workspace`, and its keystore to
/// `.soulchain/keystore.json`.
///
/// Every entry is decoded and checked against its hash before anything is
/// written.
pub async fn import_bundle(workspace: &Path, bundle: &Bundle) -> Result<ImportReport> {
    if bundle.version != BUNDLE_VERSION {
        return Err(SoulError::Bundle(format!(
            "unsupported bundle version {}",
            bundle.version
        )));
    }

    let mut decoded = Vec::with_capacity(bundle.files.len());
    for (path, file) in &bundle.files {
        if !is_contained(path) {
            return Err(SoulError::Bundle(format!("path escapes workspace: {path}")));
        }
        let content = STANDARD
            .decode(&file.content)
            .map_err(|e| SoulError::Bundle(format!("{path}: {e}")))?;
        let expected = Digest::from_hex(&file.hash)
            .map_err(|e| SoulError::Bundle(format!("{path}: bad hash: {e}")))?;
        if Digest::sha256(&content) != expected {
            return Err(SoulError::Integrity(format!("{path} does not match its bundled hash")));
        }
        decoded.push((path, content));
    }

    for (path, content) in &decoded {
        let target = workspace.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
    }

    if let Some(keystore) = &bundle.keystore {
        write_keystore(&workspace.join(WORKSPACE_KEYSTORE), keystore).await?;
    }

    info!(files = decoded.len(), keystore = bundle.keystore.is_some(), "imported bundle");
    Ok(ImportReport {
        files: decoded.len(),
        keystore: bundle.keystore.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    fn workspace_config() -> SoulConfig {
        SoulConfig {
            keystore_path: ".soulchain/keystore.json".into(),
            ..SoulConfig::default()
        }
    }

    #[tokio::test]
    async fn test_export_import() {
        let src = tempfile::tempdir().unwrap();
        tokio::fs::write(src.path().join("SOUL.md"), b"# soul").await.unwrap();
        tokio::fs::write(src.path().join("MEMORY.md"), b"remember").await.unwrap();
        let keystore = Keystore {
            version: 1,
            algorithm: "argon2id".into(),
            salt: "00".repeat(32),
            iv: "11".repeat(12),
            ciphertext: "22".repeat(32),
            tag: "33".repeat(16),
        };
        write_keystore(&src.path().join(".soulchain/keystore.json"), &keystore)
            .await
            .unwrap();

        let bundle = export_bundle(src.path(), &workspace_config()).await.unwrap();
        assert_eq!(bundle.files.len(), 2);
        assert_eq!(bundle.files["SOUL.md"].hash, Digest::sha256(b"# soul").to_hex());

        let json = bundle.to_json().unwrap();
        let parsed = Bundle::from_json(&json).unwrap();
        assert_eq!(parsed, bundle);

        let dst = tempfile::tempdir().unwrap();
        let report = import_bundle(dst.path(), &parsed).await.unwrap();
        assert_eq!(report, ImportReport { files: 2, keystore: true });
        assert_eq!(tokio::fs::read(dst.path().join("MEMORY.md")).await.unwrap(), b"remember");
        assert_eq!(
            read_keystore(&dst.path().join(WORKSPACE_KEYSTORE)).await.unwrap(),
            keystore
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_bundles() {
        let dst = tempfile::tempdir().unwrap();
        let mut bundle = Bundle {
            version: 2,
            timestamp: 0,
            chain: ChainSetting::Named("mock".into()),
            storage: StorageKind::Mock,
            files: BTreeMap::new(),
            keystore: None,
        };
        let err = import_bundle(dst.path(), &bundle).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);

        bundle.version = 1;
        bundle.files.insert(
            "../escape.md".into(),
            BundleFile {
                content: STANDARD.encode(b"x"),
                hash: Digest::sha256(b"x").to_hex(),
            },
        );
        assert!(matches!(import_bundle(dst.path(), &bundle).await, Err(SoulError::Bundle(_))));

        bundle.files.clear();
        bundle.files.insert(
            "notes/a.md".into(),
            BundleFile {
                content: STANDARD.encode(b"x"),
                hash: Digest::sha256(b"y").to_hex(),
            },
        );
        let err = import_bundle(dst.path(), &bundle).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Authentication);
        assert!(!dst.path().join("notes").exists());
    }
}
