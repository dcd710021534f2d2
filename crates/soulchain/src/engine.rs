//! The sync engine: write, verify, restore and share an agent's documents.
//!
//! Every write runs the same pipeline under a per-doc-type lock:
//! hash, encrypt under the key for the version about to be appended, upload
//! the framed blob, then anchor it on the ledger. Nothing is anchored unless
//! the upload succeeded, and a version mismatch at anchor time is reported
//! as a conflict rather than silently accepted.
//!
//! The engine is an explicit session handle. Callers own it and share it
//! (usually as `Arc<SyncEngine<..>>`) with a [`SyncWorker`].
//!
//! [`SyncWorker`]: crate::worker::SyncWorker

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use soulchain_access::{AccessKey, AgreementSecret};
use soulchain_chain::{ChainError, ChainProvider, TxHash};
use soulchain_core::{
    now_millis, validate_history, verify_document_signature, AgentAddress, Digest, DocType,
    Document, DocumentWrite, Keypair, StorageRef, SymmetricKey,
};
use soulchain_store::{NewSyncItem, StorageAdapter, SyncItem, SyncQueue};

use crate::classify::resolve_doc_type;
use crate::config::EngineConfig;
use crate::error::{Result, SoulError};
use crate::sealer::{self, Sealer};

/// Where a path is in the write pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    Hashing,
    Encrypting,
    Uploading,
    Anchoring,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Hashing => "hashing",
            SyncPhase::Encrypting => "encrypting",
            SyncPhase::Uploading => "uploading",
            SyncPhase::Anchoring => "anchoring",
        };
        f.write_str(name)
    }
}

/// A completed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub path: String,
    pub doc_type: DocType,
    pub version: u32,
    pub content_hash: Digest,
    pub storage_ref: StorageRef,
    pub tx: TxHash,
}

/// What [`SyncEngine::handle_write`] did with a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Anchored(WriteReceipt),
    /// Queued; the id of the queue item.
    Staged(String),
}

/// Result of comparing tracked files with their anchored hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub verified: usize,
    /// Local bytes differ from the latest anchored version.
    pub tampered: Vec<String>,
    /// Anchored, but gone from the workspace.
    pub missing: Vec<String>,
    /// Present locally, never anchored.
    pub untracked: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.tampered.is_empty() && self.missing.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub files_found: usize,
    pub files_uploaded: usize,
    pub files_failed: Vec<String>,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    /// Writes in flight plus items waiting in the queue.
    pub pending: u64,
    /// Unix ms of the last anchored write.
    pub last_sync: Option<i64>,
    pub in_progress: bool,
}

/// One async mutex per doc type, shared by direct writes and the worker.
#[derive(Default)]
struct DocTypeLocks {
    locks: Mutex<HashMap<DocType, Arc<AsyncMutex<()>>>>,
}

impl DocTypeLocks {
    async fn acquire(&self, doc_type: DocType) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(doc_type).or_default())
        };
        lock.lock_owned().await
    }
}

/// Tracks one write for `phase` and `status`; resets on drop, whatever the
/// outcome.
struct Progress<'a> {
    phases: &'a Mutex<HashMap<String, SyncPhase>>,
    in_flight: &'a AtomicUsize,
    path: String,
}

impl<'a> Progress<'a> {
    fn start(phases: &'a Mutex<HashMap<String, SyncPhase>>, in_flight: &'a AtomicUsize, path: &str) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            phases,
            in_flight,
            path: path.to_string(),
        }
    }

    fn set(&self, phase: SyncPhase) {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.path.clone(), phase);
    }
}

impl Drop for Progress<'_> {
    fn drop(&mut self) {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Orchestrates writes, restores, integrity checks and sharing for one
/// agent.
pub struct SyncEngine<C, S> {
    chain: C,
    storage: S,
    keypair: Keypair,
    agreement: AgreementSecret,
    sealer: Sealer,
    config: EngineConfig,
    queue: Option<SyncQueue>,
    locks: DocTypeLocks,
    phases: Mutex<HashMap<String, SyncPhase>>,
    in_flight: AtomicUsize,
    last_sync: Mutex<Option<i64>>,
}

impl<C: ChainProvider, S: StorageAdapter> SyncEngine<C, S> {
    /// Build an engine acting as `keypair`. The chain provider must act as
    /// the same agent.
    pub fn new(chain: C, storage: S, keypair: Keypair, config: EngineConfig) -> Result<Self> {
        if chain.address() != keypair.address() {
            return Err(SoulError::Config(format!(
                "chain provider acts as {}, keypair is {}",
                chain.address(),
                keypair.address()
            )));
        }
        config.validate()?;
        let agreement = AgreementSecret::derive(&keypair.seed()[..])?;
        let sealer = Sealer::new(keypair.seed());
        Ok(Self {
            chain,
            storage,
            keypair,
            agreement,
            sealer,
            config,
            queue: None,
            locks: DocTypeLocks::default(),
            phases: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            last_sync: Mutex::new(None),
        })
    }

    /// Attach a queue for [`stage_write`](Self::stage_write).
    pub fn with_queue(mut self, queue: SyncQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn address(&self) -> AgentAddress {
        self.keypair.address()
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn queue(&self) -> Option<&SyncQueue> {
        self.queue.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn doc_type_for(&self, path: &str) -> DocType {
        resolve_doc_type(path, &self.config.doc_type_overrides)
    }

    fn workspace_path(&self, path: &str) -> PathBuf {
        self.config.workspace_dir.join(path)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration & lineage
    // ─────────────────────────────────────────────────────────────────────────

    /// Register this agent and publish its agreement key.
    pub async fn register(&self) -> Result<TxHash> {
        let tx = self.chain.register_soul(self.agreement.public_key()).await?;
        info!(agent = %self.address(), %tx, "registered soul");
        Ok(tx)
    }

    pub async fn is_registered(&self) -> Result<bool> {
        Ok(self.chain.is_registered(&self.address()).await?)
    }

    /// Make `child` a child of this agent.
    pub async fn register_child(&self, child: &AgentAddress) -> Result<TxHash> {
        let tx = self.chain.register_child(child).await?;
        info!(parent = %self.address(), %child, "registered child");
        Ok(tx)
    }

    pub async fn children(&self) -> Result<Vec<AgentAddress>> {
        Ok(self.chain.get_children(&self.address()).await?)
    }

    pub async fn parent(&self) -> Result<Option<AgentAddress>> {
        Ok(self.chain.get_parent(&self.address()).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Route a file change by the configured sync mode: anchor it now in
    /// `on-write` mode, otherwise stage it for the worker.
    pub async fn handle_write(&self, path: &str, plaintext: &[u8]) -> Result<WriteOutcome> {
        if !self.config.sync_mode.stages_writes() {
            return Ok(WriteOutcome::Anchored(self.on_file_write(path, plaintext).await?));
        }
        let id = self.stage_write(path, plaintext).await?;
        debug!(path, %id, mode = ?self.config.sync_mode, "staged write");
        Ok(WriteOutcome::Staged(id))
    }

    /// Anchor new content for `path`, classifying it from the path.
    pub async fn on_file_write(&self, path: &str, plaintext: &[u8]) -> Result<WriteReceipt> {
        let doc_type = self.doc_type_for(path);
        self.commit(path, doc_type, plaintext).await
    }

    /// Anchor new content for `path` as an explicit doc type.
    pub async fn on_file_write_as(&self, path: &str, doc_type: DocType, plaintext: &[u8]) -> Result<WriteReceipt> {
        self.commit(path, doc_type, plaintext).await
    }

    /// Queue a write for the worker instead of anchoring it now.
    ///
    /// The payload is sealed under the staging key before it reaches disk.
    /// Returns the queue item id.
    pub async fn stage_write(&self, path: &str, plaintext: &[u8]) -> Result<String> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| SoulError::Config("no sync queue attached".into()))?;
        let content_hash = Digest::sha256(plaintext);
        let item = NewSyncItem {
            doc_type: self.doc_type_for(path),
            path: path.to_string(),
            content_hash,
            encrypted_payload: self.sealer.stage(plaintext)?,
            signature: self.keypair.sign(content_hash.as_bytes()),
        };
        Ok(queue.enqueue(item).await?)
    }

    /// Anchor a queued write. Used by the worker.
    pub async fn commit_staged(&self, item: &SyncItem) -> Result<WriteReceipt> {
        let plaintext = self.sealer.unstage(&item.encrypted_payload)?;
        if Digest::sha256(&plaintext) != item.content_hash {
            return Err(SoulError::Integrity(format!(
                "staged payload for {} does not match its content hash",
                item.path
            )));
        }
        self.keypair
            .public_key()
            .verify(item.content_hash.as_bytes(), &item.signature)?;
        self.commit(&item.path, item.doc_type, &plaintext).await
    }

    async fn commit(&self, path: &str, doc_type: DocType, plaintext: &[u8]) -> Result<WriteReceipt> {
        let progress = Progress::start(&self.phases, &self.in_flight, path);
        // Set before waiting on the lock so a queued write is never reported
        // as idle while it counts as in progress.
        progress.set(SyncPhase::Hashing);
        let _guard = self.locks.acquire(doc_type).await;

        let version = self.chain.document_count(doc_type).await?;

        progress.set(SyncPhase::Encrypting);
        let sealed = self.sealer.seal(doc_type, version, plaintext)?;
        let signature = self.keypair.sign(sealed.content_hash.as_bytes());

        progress.set(SyncPhase::Uploading);
        let storage_ref = self
            .storage
            .upload(Bytes::from(sealed.blob), &format!("{path}.enc"))
            .await?;

        progress.set(SyncPhase::Anchoring);
        let anchor = self
            .chain
            .write_document(DocumentWrite {
                doc_type,
                content_hash: sealed.content_hash,
                encrypted_hash: sealed.encrypted_hash,
                storage_ref: storage_ref.clone(),
                signature,
            })
            .await?;
        if anchor.version != version {
            warn!(path, %doc_type, expected = version, got = anchor.version, "version conflict");
            return Err(ChainError::VersionConflict {
                expected: version,
                got: anchor.version,
            }
            .into());
        }

        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(now_millis());
        info!(path, %doc_type, version, tx = %anchor.tx, "anchored document");

        Ok(WriteReceipt {
            path: path.to_string(),
            doc_type,
            version,
            content_hash: sealed.content_hash,
            storage_ref,
            tx: anchor.tx,
        })
    }

    /// Write every existing file in `paths` under `root`. Failures are
    /// collected, not propagated.
    pub async fn migrate_existing(&self, root: &Path, paths: &[String]) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        for path in paths {
            let Some(bytes) = read_optional(&root.join(path)).await? else {
                continue;
            };
            report.files_found += 1;
            report.total_bytes += bytes.len() as u64;
            match self.on_file_write(path, &bytes).await {
                Ok(_) => report.files_uploaded += 1,
                Err(e) => {
                    warn!(path, error = %e, "migration write failed");
                    report.files_failed.push(path.clone());
                }
            }
        }
        info!(
            found = report.files_found,
            uploaded = report.files_uploaded,
            failed = report.files_failed.len(),
            "migrated existing files"
        );
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Compare each tracked file with its latest anchored hash.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::default();
        for path in &self.config.tracked_paths {
            let doc_type = self.doc_type_for(path);
            let anchored = self.chain.latest_document(doc_type).await?;
            let local = read_optional(&self.workspace_path(path)).await?;

            match (anchored, local) {
                (None, None) => {}
                (None, Some(_)) => report.untracked.push(path.clone()),
                (Some(_), None) => report.missing.push(path.clone()),
                (Some(doc), Some(bytes)) => {
                    if Digest::sha256(&bytes) == doc.content_hash {
                        report.verified += 1;
                    } else {
                        warn!(path, %doc_type, version = doc.version, "local file differs from anchor");
                        report.tampered.push(path.clone());
                    }
                }
            }
        }
        Ok(report)
    }

    /// Fetch and decrypt an anchored version of `path` (the latest when
    /// `version` is `None`).
    pub async fn restore_file(&self, path: &str, version: Option<u32>) -> Result<Vec<u8>> {
        let doc_type = self.doc_type_for(path);
        let doc = match version {
            Some(v) => self.chain.document_at(doc_type, v).await?,
            None => self.chain.latest_document(doc_type).await?,
        };
        let doc = doc.ok_or_else(|| match version {
            Some(v) => SoulError::NotFound(format!("no ledger record for {path} v{v}")),
            None => SoulError::NotFound(format!("no ledger record for {path}")),
        })?;

        let key = self.sealer.document_key(doc_type, doc.version)?;
        let plaintext = self.open_document(&doc, &key).await?;
        debug!(path, %doc_type, version = doc.version, "restored document");
        Ok(plaintext)
    }

    /// Restore `path` and write it back into the workspace.
    pub async fn restore_into_workspace(&self, path: &str, version: Option<u32>) -> Result<Vec<u8>> {
        let plaintext = self.restore_file(path, version).await?;
        let target = self.workspace_path(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &plaintext).await?;
        Ok(plaintext)
    }

    /// Local bytes when the file exists, otherwise the latest anchored
    /// version. Nothing is written to disk.
    pub async fn read_or_restore(&self, path: &str) -> Result<Vec<u8>> {
        match read_optional(&self.workspace_path(path)).await? {
            Some(bytes) => Ok(bytes),
            None => self.restore_file(path, None).await,
        }
    }

    async fn open_document(&self, doc: &Document, key: &SymmetricKey) -> Result<Vec<u8>> {
        let blob = self.storage.download(&doc.storage_ref).await?;
        let plaintext = sealer::open(key, &blob, &doc.encrypted_hash)?;
        if Digest::sha256(&plaintext) != doc.content_hash {
            return Err(SoulError::Integrity(format!(
                "{} v{} decrypted to unexpected content",
                doc.doc_type, doc.version
            )));
        }
        Ok(plaintext)
    }

    /// Every anchored version of `doc_type`, oldest first.
    pub async fn history(&self, doc_type: DocType) -> Result<Vec<Document>> {
        let count = self.chain.document_count(doc_type).await?;
        let mut documents = Vec::with_capacity(count as usize);
        for version in 0..count {
            let doc = self.chain.document_at(doc_type, version).await?.ok_or_else(|| {
                SoulError::NotFound(format!("{doc_type} v{version} missing from ledger"))
            })?;
            documents.push(doc);
        }
        Ok(documents)
    }

    /// Check the full history of `doc_type`: contiguous versions, hash links
    /// and signatures. Returns the number of versions checked.
    pub async fn audit(&self, doc_type: DocType) -> Result<u32> {
        let documents = self.history(doc_type).await?;
        validate_history(&self.address(), &documents)?;
        Ok(documents.len() as u32)
    }

    pub async fn latest_version(&self, path: &str) -> Result<Option<u32>> {
        let doc = self.chain.latest_document(self.doc_type_for(path)).await?;
        Ok(doc.map(|d| d.version))
    }

    pub async fn latest_hash(&self, path: &str) -> Result<Option<Digest>> {
        let doc = self.chain.latest_document(self.doc_type_for(path)).await?;
        Ok(doc.map(|d| d.content_hash))
    }

    pub fn phase(&self, path: &str) -> SyncPhase {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .unwrap_or_default()
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let in_flight = self.in_flight.load(Ordering::SeqCst) as u64;
        let last_sync = *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner);
        let queued = match &self.queue {
            Some(queue) => queue.pending().await?,
            None => 0,
        };
        Ok(EngineStatus {
            pending: in_flight + queued,
            last_sync,
            in_progress: in_flight > 0,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Selective disclosure
    // ─────────────────────────────────────────────────────────────────────────

    /// Let `reader` decrypt the latest version of `doc_type`.
    ///
    /// Wraps that version's key for the reader, grants access and stores
    /// the wrapped key. Returns the version shared.
    pub async fn share_with(&self, reader: &AgentAddress, doc_type: DocType) -> Result<u32> {
        let doc = self
            .chain
            .latest_document(doc_type)
            .await?
            .ok_or_else(|| SoulError::NotFound(format!("no {doc_type} document to share")))?;
        let reader_key = self
            .chain
            .agreement_key_of(reader)
            .await?
            .ok_or_else(|| SoulError::NotFound(format!("agreement key for {reader}")))?;

        let document_key = self.sealer.document_key(doc_type, doc.version)?;
        let access_key = AccessKey::issue(&self.agreement, &reader_key, doc_type, doc.version, &document_key)?;

        self.chain.grant_access(reader, doc_type).await?;
        self.chain
            .store_access_key(reader, doc_type, access_key.to_bytes())
            .await?;
        info!(%reader, %doc_type, version = doc.version, "shared document");
        Ok(doc.version)
    }

    /// Withdraw `reader`'s grant and access key. Keys already handed out
    /// are not rotated.
    pub async fn revoke_from(&self, reader: &AgentAddress, doc_type: DocType) -> Result<()> {
        self.chain.revoke_access(reader, doc_type).await?;
        self.chain.remove_access_key(reader, doc_type).await?;
        info!(%reader, %doc_type, "revoked access");
        Ok(())
    }

    /// Read a document another agent shared with this one.
    ///
    /// Access is checked by the ledger; the plaintext is the version the
    /// access key was issued for.
    pub async fn read_shared(&self, owner: &AgentAddress, doc_type: DocType) -> Result<Vec<u8>> {
        let me = self.address();
        let latest = self
            .chain
            .latest_document_of(owner, doc_type)
            .await?
            .ok_or_else(|| SoulError::NotFound(format!("{owner} has no {doc_type} document")))?;
        let wrapped = self
            .chain
            .get_access_key(owner, &me, doc_type)
            .await?
            .ok_or_else(|| SoulError::NotFound(format!("access key from {owner} for {doc_type}")))?;
        let owner_key = self
            .chain
            .agreement_key_of(owner)
            .await?
            .ok_or_else(|| SoulError::NotFound(format!("agreement key for {owner}")))?;

        let access_key = AccessKey::from_bytes(&wrapped)?;
        let document_key = access_key.open(&self.agreement, &owner_key, doc_type)?;

        let doc = if access_key.version == latest.version {
            latest
        } else {
            self.chain
                .document_of_at(owner, doc_type, access_key.version)
                .await?
                .ok_or_else(|| {
                    SoulError::NotFound(format!("{owner} {doc_type} v{}", access_key.version))
                })?
        };
        if !verify_document_signature(owner, &doc) {
            return Err(SoulError::Integrity(format!(
                "{owner} {doc_type} v{} is not signed by its owner",
                doc.version
            )));
        }

        self.open_document(&doc, &document_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use soulchain_chain::{MemoryChain, MemoryLedger};
    use soulchain_store::{MemoryBlobStore, StoreError};

    use crate::config::SyncMode;

    type Engine = SyncEngine<MemoryChain, MemoryBlobStore>;

    async fn engine(ledger: &MemoryLedger, blobs: &MemoryBlobStore, dir: &Path) -> Engine {
        let keypair = Keypair::generate();
        let engine = SyncEngine::new(
            ledger.connect(keypair.address()),
            blobs.clone(),
            keypair,
            EngineConfig::new(dir),
        )
        .unwrap();
        engine.register().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_versions_chain_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let blobs = MemoryBlobStore::new();
        let engine = engine(&ledger, &blobs, dir.path()).await;

        for (i, body) in [b"v1".as_slice(), b"v2", b"v3"].iter().enumerate() {
            let receipt = engine.on_file_write("SOUL.md", body).await.unwrap();
            assert_eq!(receipt.version, i as u32);
            assert_eq!(receipt.doc_type, DocType::Soul);
        }

        let history = engine.history(DocType::Soul).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].prev_hash.is_zero());
        assert_eq!(history[2].prev_hash, Digest::sha256(b"v2"));
        assert_eq!(engine.audit(DocType::Soul).await.unwrap(), 3);

        assert_eq!(engine.restore_file("SOUL.md", None).await.unwrap(), b"v3");
        assert_eq!(engine.restore_file("SOUL.md", Some(0)).await.unwrap(), b"v1");
        assert_eq!(engine.latest_version("SOUL.md").await.unwrap(), Some(2));
        assert_eq!(
            engine.latest_hash("SOUL.md").await.unwrap(),
            Some(Digest::sha256(b"v3"))
        );

        let missing = engine.restore_file("SOUL.md", Some(9)).await.unwrap_err();
        assert_eq!(missing.class(), ErrorClass::NotFound);
        assert_eq!(engine.phase("SOUL.md"), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_integrity_report() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let blobs = MemoryBlobStore::new();
        let engine = engine(&ledger, &blobs, dir.path()).await;

        tokio::fs::write(dir.path().join("SOUL.md"), b"soul").await.unwrap();
        tokio::fs::write(dir.path().join("MEMORY.md"), b"memory").await.unwrap();
        tokio::fs::write(dir.path().join("USER.md"), b"user").await.unwrap();
        engine.on_file_write("SOUL.md", b"soul").await.unwrap();
        engine.on_file_write("MEMORY.md", b"memory").await.unwrap();
        engine.on_file_write("AGENTS.md", b"agents").await.unwrap();

        let clean = engine.verify_integrity().await.unwrap();
        assert_eq!(clean.verified, 2);
        assert_eq!(clean.missing, vec!["AGENTS.md".to_string()]);
        assert_eq!(clean.untracked, vec!["USER.md".to_string()]);

        tokio::fs::write(dir.path().join("MEMORY.md"), b"edited").await.unwrap();
        let report = engine.verify_integrity().await.unwrap();
        assert_eq!(report.tampered, vec!["MEMORY.md".to_string()]);
        assert_eq!(report, engine.verify_integrity().await.unwrap());
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_swapped_blob_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let blobs = MemoryBlobStore::new();
        let engine = engine(&ledger, &blobs, dir.path()).await;

        let receipt = engine.on_file_write("MEMORY.md", b"real").await.unwrap();
        blobs
            .replace(&receipt.storage_ref, Bytes::from_static(b"forged bytes, long enough to frame"))
            .unwrap();

        let err = engine.restore_file("MEMORY.md", None).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Authentication);
    }

    #[tokio::test]
    async fn test_unregistered_write_is_not_anchored() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let keypair = Keypair::generate();
        let engine = SyncEngine::new(
            ledger.connect(keypair.address()),
            MemoryBlobStore::new(),
            keypair,
            EngineConfig::new(dir.path()),
        )
        .unwrap();

        let err = engine.on_file_write("SOUL.md", b"x").await.unwrap_err();
        assert!(matches!(err, SoulError::Chain(ChainError::NotRegistered(_))));
        assert_eq!(engine.latest_version("SOUL.md").await.unwrap(), None);
        let status = engine.status().await.unwrap();
        assert_eq!(status.pending, 0);
        assert!(status.last_sync.is_none());
    }

    #[tokio::test]
    async fn test_mismatched_identity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let result = SyncEngine::new(
            ledger.connect(Keypair::generate().address()),
            MemoryBlobStore::new(),
            Keypair::generate(),
            EngineConfig::new(dir.path()),
        );
        assert!(matches!(result, Err(SoulError::Config(_))));
    }

    #[tokio::test]
    async fn test_tracked_paths_sharing_doc_type_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Keypair::generate();
        let mut config = EngineConfig::new(dir.path());
        config.tracked_paths = vec!["SOUL.md".into(), "notes.md".into()];
        let result = SyncEngine::new(
            MemoryLedger::new().connect(keypair.address()),
            MemoryBlobStore::new(),
            keypair,
            config,
        );
        assert!(matches!(result, Err(SoulError::Config(_))));
    }

    #[tokio::test]
    async fn test_handle_write_follows_sync_mode() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let blobs = MemoryBlobStore::new();

        let inline = engine(&ledger, &blobs, dir.path()).await;
        match inline.handle_write("SOUL.md", b"now").await.unwrap() {
            WriteOutcome::Anchored(receipt) => assert_eq!(receipt.version, 0),
            other => panic!("expected an anchored write, got {other:?}"),
        }

        for mode in [SyncMode::Interval, SyncMode::Manual] {
            let keypair = Keypair::generate();
            let staged = SyncEngine::new(
                ledger.connect(keypair.address()),
                blobs.clone(),
                keypair,
                EngineConfig::new(dir.path()).with_sync_mode(mode),
            )
            .unwrap();
            staged.register().await.unwrap();

            let err = staged.handle_write("SOUL.md", b"later").await.unwrap_err();
            assert!(matches!(err, SoulError::Config(_)));

            let staged = staged.with_queue(SyncQueue::open_memory().unwrap());
            let WriteOutcome::Staged(id) = staged.handle_write("SOUL.md", b"later").await.unwrap() else {
                panic!("{mode:?} should stage writes");
            };
            let item = staged.queue().unwrap().get(&id).await.unwrap().unwrap();
            assert_eq!(item.doc_type, DocType::Soul);
            assert_eq!(staged.latest_version("SOUL.md").await.unwrap(), None);
        }
    }

    /// Holds every upload until a permit is added.
    #[derive(Clone)]
    struct Gated {
        inner: MemoryBlobStore,
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait::async_trait]
    impl StorageAdapter for Gated {
        async fn upload(&self, data: Bytes, name: &str) -> soulchain_store::Result<StorageRef> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| StoreError::Unavailable("gate closed".into()))?;
            self.inner.upload(data, name).await
        }

        async fn download(&self, locator: &StorageRef) -> soulchain_store::Result<Bytes> {
            self.inner.download(locator).await
        }

        async fn exists(&self, locator: &StorageRef) -> soulchain_store::Result<bool> {
            self.inner.exists(locator).await
        }
    }

    #[tokio::test]
    async fn test_write_waiting_on_lock_reports_phase() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Keypair::generate();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let storage = Gated {
            inner: MemoryBlobStore::new(),
            gate: Arc::clone(&gate),
        };
        let engine = SyncEngine::new(
            MemoryLedger::new().connect(keypair.address()),
            storage,
            keypair,
            EngineConfig::new(dir.path()),
        )
        .unwrap();
        engine.register().await.unwrap();
        let engine = Arc::new(engine);

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.on_file_write("MEMORY.md", b"first").await }
        });
        for _ in 0..200 {
            if engine.phase("MEMORY.md") == SyncPhase::Uploading {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(engine.phase("MEMORY.md"), SyncPhase::Uploading);

        let second = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.on_file_write_as("notes/recall.md", DocType::Memory, b"second").await }
        });
        for _ in 0..200 {
            if engine.status().await.unwrap().pending == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(engine.status().await.unwrap().pending, 2);

        assert_eq!(engine.phase("notes/recall.md"), SyncPhase::Hashing);
        assert!(engine.status().await.unwrap().in_progress);

        gate.add_permits(1);
        assert_eq!(first.await.unwrap().unwrap().version, 0);
        assert_eq!(second.await.unwrap().unwrap().version, 1);
        assert_eq!(engine.phase("notes/recall.md"), SyncPhase::Idle);
        assert_eq!(engine.restore_file("MEMORY.md", None).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_read_or_restore() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let blobs = MemoryBlobStore::new();
        let engine = engine(&ledger, &blobs, dir.path()).await;

        engine.on_file_write("MEMORY.md", b"anchored").await.unwrap();
        assert_eq!(engine.read_or_restore("MEMORY.md").await.unwrap(), b"anchored");
        assert!(!dir.path().join("MEMORY.md").exists());

        tokio::fs::write(dir.path().join("MEMORY.md"), b"local").await.unwrap();
        assert_eq!(engine.read_or_restore("MEMORY.md").await.unwrap(), b"local");

        engine.restore_into_workspace("MEMORY.md", None).await.unwrap();
        assert_eq!(tokio::fs::read(dir.path().join("MEMORY.md")).await.unwrap(), b"anchored");
    }

    #[tokio::test]
    async fn test_stage_then_commit() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let blobs = MemoryBlobStore::new();
        let engine = engine(&ledger, &blobs, dir.path())
            .await
            .with_queue(SyncQueue::open_memory().unwrap());

        let id = engine.stage_write("MEMORY.md", b"later").await.unwrap();
        assert_eq!(engine.status().await.unwrap().pending, 1);
        assert_eq!(engine.latest_version("MEMORY.md").await.unwrap(), None);

        let queue = engine.queue().unwrap().clone();
        let item = queue.dequeue(1).await.unwrap().remove(0);
        assert_eq!(item.id, id);
        assert_ne!(item.encrypted_payload, b"later");

        let receipt = engine.commit_staged(&item).await.unwrap();
        assert_eq!(receipt.version, 0);
        assert_eq!(engine.restore_file("MEMORY.md", None).await.unwrap(), b"later");
    }

    #[tokio::test]
    async fn test_share_read_revoke() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let blobs = MemoryBlobStore::new();
        let owner = engine(&ledger, &blobs, dir.path()).await;
        let reader = engine(&ledger, &blobs, dir.path()).await;

        owner.on_file_write("MEMORY.md", b"secret").await.unwrap();
        assert_eq!(owner.share_with(&reader.address(), DocType::Memory).await.unwrap(), 0);
        assert_eq!(
            reader.read_shared(&owner.address(), DocType::Memory).await.unwrap(),
            b"secret"
        );

        owner.revoke_from(&reader.address(), DocType::Memory).await.unwrap();
        let err = reader.read_shared(&owner.address(), DocType::Memory).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::AccessDenied);
    }
}
