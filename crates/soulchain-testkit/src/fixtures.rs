//! Test fixtures and helpers.
//!
//! Agents share one in-memory ledger and one blob store, the way several
//! agents on a network would, and each gets its own temporary workspace.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

use soulchain::{EngineConfig, SyncEngine, WriteReceipt};
use soulchain_chain::{MemoryChain, MemoryLedger};
use soulchain_core::{AgentAddress, Keypair, StorageRef};
use soulchain_store::{MemoryBlobStore, StorageAdapter, StoreError, SyncQueue};

pub type MemoryEngine = SyncEngine<MemoryChain, MemoryBlobStore>;

/// Install a `tracing` subscriber that writes through the test harness.
/// Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// A shared ledger and blob store.
#[derive(Clone, Default)]
pub struct TestNetwork {
    pub ledger: MemoryLedger,
    pub blobs: MemoryBlobStore,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registered agent with a random identity.
    pub async fn agent(&self) -> TestAgent {
        self.agent_with(Keypair::generate()).await
    }

    /// A registered agent with a deterministic identity.
    pub async fn agent_from_seed(&self, seed: [u8; 32]) -> TestAgent {
        self.agent_with(Keypair::from_seed(&seed)).await
    }

    async fn agent_with(&self, keypair: Keypair) -> TestAgent {
        let workspace = TempDir::new().expect("create workspace");
        let queue = SyncQueue::open(workspace.path().join("queue.db")).expect("open queue");
        let engine = SyncEngine::new(
            self.ledger.connect(keypair.address()),
            self.blobs.clone(),
            keypair.clone(),
            EngineConfig::new(workspace.path()),
        )
        .expect("build engine")
        .with_queue(queue);
        engine.register().await.expect("register agent");

        TestAgent {
            keypair,
            engine: Arc::new(engine),
            workspace,
        }
    }

    /// Several registered agents with distinct deterministic identities.
    pub async fn agents(&self, count: usize) -> Vec<TestAgent> {
        let mut agents = Vec::with_capacity(count);
        for i in 0..count {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[31] = 0xa5;
            agents.push(self.agent_from_seed(seed).await);
        }
        agents
    }
}

/// One agent: identity, engine and workspace.
pub struct TestAgent {
    pub keypair: Keypair,
    pub engine: Arc<MemoryEngine>,
    pub workspace: TempDir,
}

impl TestAgent {
    pub fn address(&self) -> AgentAddress {
        self.keypair.address()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.workspace.path().join(relative)
    }

    /// Write `content` into the workspace and anchor it, as a host's file
    /// hook would.
    pub async fn write(&self, relative: &str, content: &[u8]) -> WriteReceipt {
        tokio::fs::write(self.path(relative), content)
            .await
            .expect("write workspace file");
        self.engine
            .on_file_write(relative, content)
            .await
            .expect("anchor write")
    }

    pub async fn read(&self, relative: &str) -> Vec<u8> {
        tokio::fs::read(self.path(relative)).await.expect("read workspace file")
    }
}

/// Storage that reports itself unavailable for the next `n` uploads.
pub struct FlakyStorage<S> {
    inner: S,
    failures: AtomicU32,
}

impl<S> FlakyStorage<S> {
    pub fn new(inner: S, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
        }
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: StorageAdapter> StorageAdapter for FlakyStorage<S> {
    async fn upload(&self, data: Bytes, name: &str) -> soulchain_store::Result<StorageRef> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable(format!("upload of {name} refused")));
        }
        self.inner.upload(data, name).await
    }

    async fn download(&self, locator: &StorageRef) -> soulchain_store::Result<Bytes> {
        self.inner.download(locator).await
    }

    async fn exists(&self, locator: &StorageRef) -> soulchain_store::Result<bool> {
        self.inner.exists(locator).await
    }
}
