//! Background drain of the sync queue.
//!
//! On every tick the worker claims a batch of staged writes and hands each
//! to the engine, which anchors it under the same per-doc-type lock as a
//! direct write. Transient failures go back to `pending` and are retried on
//! a later tick until `max_retries` attempts have failed. While an item waits
//! for its retry, newer writes of the same doc type wait behind it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use soulchain_chain::ChainProvider;
use soulchain_store::{StorageAdapter, SyncItem, SyncQueue};

use crate::config::WorkerConfig;
use crate::engine::{SyncEngine, WriteReceipt};
use crate::error::{ErrorClass, Result, SoulError};

/// What happened to one queued item.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Completed {
        item_id: String,
        receipt: WriteReceipt,
    },
    Failed {
        item_id: String,
        path: String,
        error: String,
        class: ErrorClass,
        will_retry: bool,
    },
}

pub type SyncCallback = Arc<dyn Fn(&SyncOutcome) + Send + Sync>;

/// Counts for a single drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Another drain was still running.
    pub skipped: bool,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub requeued: usize,
    /// Handed back untouched because an earlier item of the same doc type
    /// is being retried.
    pub deferred: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Done,
    Retrying,
    Dropped,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains an engine's queue.
pub struct SyncWorker<C, S> {
    engine: Arc<SyncEngine<C, S>>,
    queue: SyncQueue,
    config: WorkerConfig,
    draining: AtomicBool,
    callback: Option<SyncCallback>,
}

impl<C, S> SyncWorker<C, S>
where
    C: ChainProvider + 'static,
    S: StorageAdapter + 'static,
{
    /// The engine must have a queue attached.
    pub fn new(engine: Arc<SyncEngine<C, S>>, config: WorkerConfig) -> Result<Self> {
        let queue = engine
            .queue()
            .cloned()
            .ok_or_else(|| SoulError::Config("sync worker needs an engine with a queue".into()))?;
        Ok(Self {
            engine,
            queue,
            config,
            draining: AtomicBool::new(false),
            callback: None,
        })
    }

    /// Start a background worker if the engine's sync mode calls for one.
    ///
    /// `manual` and `on-write` engines get `None`; a `manual` caller drains
    /// with [`tick`](Self::tick) on a worker built with [`new`](Self::new).
    pub fn spawn_for(engine: Arc<SyncEngine<C, S>>, config: WorkerConfig) -> Result<Option<WorkerHandle>> {
        let mode = engine.config().sync_mode;
        if !mode.runs_worker() {
            debug!(?mode, "no background worker for sync mode");
            return Ok(None);
        }
        let worker = Arc::new(Self::new(engine, config)?);
        Ok(Some(worker.start()))
    }

    /// Called once per processed item, success or failure.
    pub fn on_outcome(mut self, callback: impl Fn(&SyncOutcome) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run one drain. Returns immediately if a drain is already running.
    ///
    /// Once an item is going to be retried, later items of the same doc type
    /// in this batch are handed back unprocessed, so they cannot reach the
    /// ledger ahead of it.
    pub async fn tick(&self) -> Result<TickReport> {
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("drain in flight, skipping tick");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        }
        let _guard = DrainGuard(&self.draining);

        let items = self.queue.dequeue(self.config.batch_size).await?;
        let mut report = TickReport {
            claimed: items.len(),
            ..TickReport::default()
        };
        let mut blocked = HashSet::new();
        let mut deferred = Vec::new();

        for item in items {
            if blocked.contains(&item.doc_type) {
                deferred.push(item.id);
                continue;
            }
            let doc_type = item.doc_type;
            if self.process(item, &mut report).await == Disposition::Retrying {
                blocked.insert(doc_type);
            }
        }

        if !deferred.is_empty() {
            match self.queue.release(&deferred).await {
                Ok(released) => report.deferred += released,
                // `recover` picks these up on the next start.
                Err(e) => warn!(items = deferred.len(), error = %e, "could not release deferred items"),
            }
        }

        if report.claimed > 0 {
            debug!(
                claimed = report.claimed,
                completed = report.completed,
                failed = report.failed,
                requeued = report.requeued,
                deferred = report.deferred,
                "drained sync queue"
            );
        }
        Ok(report)
    }

    async fn process(&self, item: SyncItem, report: &mut TickReport) -> Disposition {
        let (outcome, disposition) = match self.engine.commit_staged(&item).await {
            Ok(receipt) => match self.queue.mark_complete(&item.id).await {
                Ok(()) => {
                    report.completed += 1;
                    let outcome = SyncOutcome::Completed {
                        item_id: item.id,
                        receipt,
                    };
                    (outcome, Disposition::Done)
                }
                // Anchored, but the row is still processing. Handing it back
                // means it may be anchored again with identical content.
                Err(e) => self.queue_failure(item, e.into(), report).await,
            },
            Err(e) => self.sync_failure(item, e, report).await,
        };
        self.notify(&outcome);
        disposition
    }

    async fn sync_failure(
        &self,
        item: SyncItem,
        error: SoulError,
        report: &mut TickReport,
    ) -> (SyncOutcome, Disposition) {
        let class = error.class();
        let attempts = item.retries + 1;
        let will_retry = class == ErrorClass::Transient && attempts < self.config.max_retries;
        let message = error.to_string();

        // `retry` moves processing straight to pending, so other workers
        // never see the item as failed in between.
        let transition = if will_retry {
            self.queue.retry(&item.id, &message).await
        } else {
            self.queue.mark_failed(&item.id, &message).await
        };
        if let Err(e) = transition {
            return self.queue_failure(item, e.into(), report).await;
        }

        report.failed += 1;
        if will_retry {
            report.requeued += 1;
        }
        warn!(id = %item.id, path = %item.path, attempts, ?class, will_retry, error = %message, "sync failed");

        let outcome = SyncOutcome::Failed {
            item_id: item.id,
            path: item.path,
            error: message,
            class,
            will_retry,
        };
        let disposition = if will_retry {
            Disposition::Retrying
        } else {
            Disposition::Dropped
        };
        (outcome, disposition)
    }

    /// The queue rejected a status change. The item is handed back to
    /// `pending` if it is still claimed.
    async fn queue_failure(
        &self,
        item: SyncItem,
        error: SoulError,
        report: &mut TickReport,
    ) -> (SyncOutcome, Disposition) {
        report.failed += 1;
        let will_retry = match self.queue.release(std::slice::from_ref(&item.id)).await {
            Ok(released) => released == 1,
            Err(e) => {
                warn!(id = %item.id, error = %e, "could not release item");
                false
            }
        };
        if will_retry {
            report.requeued += 1;
        }
        warn!(id = %item.id, path = %item.path, error = %error, will_retry, "queue update failed");

        let outcome = SyncOutcome::Failed {
            item_id: item.id,
            path: item.path,
            error: error.to_string(),
            class: error.class(),
            will_retry,
        };
        // The item's state is unknown, so the rest of its doc type waits.
        (outcome, Disposition::Retrying)
    }

    fn notify(&self, outcome: &SyncOutcome) {
        if let Some(callback) = &self.callback {
            callback(outcome);
        }
    }

    /// Drain on every interval until the handle is stopped or dropped.
    ///
    /// Items left in `processing` by an earlier run are returned to the
    /// queue first.
    pub fn start(self: Arc<Self>) -> WorkerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            if let Err(e) = self.queue.recover().await {
                warn!(error = %e, "could not recover interrupted queue items");
            }

            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = self.config.interval.as_millis() as u64, "sync worker started");

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            warn!(error = %e, "sync tick failed");
                        }
                    }
                }
            }
            info!("sync worker stopped");
        });
        WorkerHandle { stop: stop_tx, task }
    }
}

/// Handle to a running worker. Dropping it also stops the worker.
pub struct WorkerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop after the current drain and wait for the loop to exit.
    pub async fn stop(self) -> Result<()> {
        // A send error means the loop already ended.
        let _ = self.stop.send(true);
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use soulchain_chain::{MemoryChain, MemoryLedger};
    use soulchain_core::{Keypair, StorageRef};
    use soulchain_store::{MemoryBlobStore, StoreError, SyncStatus};

    use crate::config::{EngineConfig, SyncMode};
    use crate::engine::WriteOutcome;

    /// Fails the first `failures` uploads.
    #[derive(Clone)]
    struct Flaky {
        inner: MemoryBlobStore,
        failures: Arc<AtomicU32>,
    }

    #[async_trait]
    impl StorageAdapter for Flaky {
        async fn upload(&self, data: Bytes, name: &str) -> soulchain_store::Result<StorageRef> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("gateway timeout".into()));
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

    async fn setup(failures: u32, register: bool) -> (Arc<SyncEngine<MemoryChain, Flaky>>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Keypair::generate();
        let storage = Flaky {
            inner: MemoryBlobStore::new(),
            failures: Arc::new(AtomicU32::new(failures)),
        };
        let engine = SyncEngine::new(
            MemoryLedger::new().connect(keypair.address()),
            storage,
            keypair,
            EngineConfig::new(dir.path()),
        )
        .unwrap()
        .with_queue(SyncQueue::open_memory().unwrap());
        if register {
            engine.register().await.unwrap();
        }
        (Arc::new(engine), dir)
    }

    fn config(max_retries: u32) -> WorkerConfig {
        WorkerConfig {
            interval: Duration::from_millis(10),
            batch_size: 10,
            max_retries,
        }
    }

    #[tokio::test]
    async fn test_drains_in_order() {
        let (engine, _dir) = setup(0, true).await;
        for body in [b"one".as_slice(), b"two", b"three"] {
            engine.stage_write("MEMORY.md", body).await.unwrap();
        }

        let worker = SyncWorker::new(Arc::clone(&engine), config(5)).unwrap();
        let report = worker.tick().await.unwrap();
        assert_eq!(report.completed, 3);
        assert_eq!(engine.latest_version("MEMORY.md").await.unwrap(), Some(2));
        assert_eq!(engine.restore_file("MEMORY.md", None).await.unwrap(), b"three");
        assert_eq!(engine.restore_file("MEMORY.md", Some(0)).await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_complete() {
        let (engine, _dir) = setup(2, true).await;
        let id = engine.stage_write("SOUL.md", b"soul").await.unwrap();

        let outcomes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&outcomes);
        let worker = SyncWorker::new(Arc::clone(&engine), config(5))
            .unwrap()
            .on_outcome(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });

        for _ in 0..2 {
            let report = worker.tick().await.unwrap();
            assert_eq!((report.failed, report.requeued), (1, 1));
        }
        let report = worker.tick().await.unwrap();
        assert_eq!(report.completed, 1);

        let item = engine.queue().unwrap().get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, SyncStatus::Complete);
        assert_eq!(item.retries, 2);
        assert_eq!(outcomes.load(Ordering::SeqCst), 3);
        assert_eq!(engine.latest_version("SOUL.md").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_retry_holds_back_later_writes_of_same_doc_type() {
        let (engine, _dir) = setup(1, true).await;
        engine.stage_write("MEMORY.md", b"one").await.unwrap();
        engine.stage_write("MEMORY.md", b"two").await.unwrap();
        let worker = SyncWorker::new(Arc::clone(&engine), config(5)).unwrap();

        let first = worker.tick().await.unwrap();
        assert_eq!(first.claimed, 2);
        assert_eq!((first.completed, first.failed, first.requeued, first.deferred), (0, 1, 1, 1));
        assert_eq!(engine.latest_version("MEMORY.md").await.unwrap(), None);

        let counts = engine.queue().unwrap().counts().await.unwrap();
        assert_eq!((counts.pending, counts.processing), (2, 0));

        assert_eq!(worker.tick().await.unwrap().completed, 2);
        assert_eq!(engine.restore_file("MEMORY.md", None).await.unwrap(), b"two");
        assert_eq!(engine.restore_file("MEMORY.md", Some(0)).await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_retry_does_not_hold_back_other_doc_types() {
        let (engine, _dir) = setup(1, true).await;
        engine.stage_write("MEMORY.md", b"memory").await.unwrap();
        engine.stage_write("SOUL.md", b"soul").await.unwrap();
        let worker = SyncWorker::new(Arc::clone(&engine), config(5)).unwrap();

        let report = worker.tick().await.unwrap();
        assert_eq!((report.completed, report.requeued, report.deferred), (1, 1, 0));
        assert_eq!(engine.restore_file("SOUL.md", None).await.unwrap(), b"soul");
    }

    /// Fails its first upload after completing `victim` behind the worker's
    /// back, so the worker's own status change is rejected.
    #[derive(Clone)]
    struct Interfering {
        inner: MemoryBlobStore,
        queue: SyncQueue,
        victim: Arc<std::sync::Mutex<Option<String>>>,
    }

    #[async_trait]
    impl StorageAdapter for Interfering {
        async fn upload(&self, data: Bytes, name: &str) -> soulchain_store::Result<StorageRef> {
            let victim = self.victim.lock().unwrap().take();
            if let Some(id) = victim {
                self.queue.mark_complete(&id).await?;
                return Err(StoreError::Unavailable("gateway timeout".into()));
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

    #[tokio::test]
    async fn test_queue_error_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Keypair::generate();
        let queue = SyncQueue::open_memory().unwrap();
        let victim = Arc::new(std::sync::Mutex::new(None));
        let storage = Interfering {
            inner: MemoryBlobStore::new(),
            queue: queue.clone(),
            victim: Arc::clone(&victim),
        };
        let engine = SyncEngine::new(
            MemoryLedger::new().connect(keypair.address()),
            storage,
            keypair,
            EngineConfig::new(dir.path()),
        )
        .unwrap()
        .with_queue(queue.clone());
        engine.register().await.unwrap();
        let engine = Arc::new(engine);

        let first = engine.stage_write("MEMORY.md", b"memory").await.unwrap();
        let second = engine.stage_write("SOUL.md", b"soul").await.unwrap();
        *victim.lock().unwrap() = Some(first.clone());

        let outcomes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&outcomes);
        let worker = SyncWorker::new(Arc::clone(&engine), config(5))
            .unwrap()
            .on_outcome(move |outcome| {
                let entry = match outcome {
                    SyncOutcome::Completed { item_id, .. } => (item_id.clone(), None),
                    SyncOutcome::Failed { item_id, class, .. } => (item_id.clone(), Some(*class)),
                };
                seen.lock().unwrap().push(entry);
            });

        let report = worker.tick().await.unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!((report.completed, report.failed, report.requeued), (1, 1, 0));
        assert_eq!(
            *outcomes.lock().unwrap(),
            vec![(first, Some(ErrorClass::NotFound)), (second.clone(), None)]
        );

        assert_eq!(queue.counts().await.unwrap().processing, 0);
        let item = queue.get(&second).await.unwrap().unwrap();
        assert_eq!(item.status, SyncStatus::Complete);
        assert_eq!(engine.restore_file("SOUL.md", None).await.unwrap(), b"soul");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (engine, _dir) = setup(10, true).await;
        let id = engine.stage_write("SOUL.md", b"soul").await.unwrap();
        let worker = SyncWorker::new(Arc::clone(&engine), config(2)).unwrap();

        assert_eq!(worker.tick().await.unwrap().requeued, 1);
        let last = worker.tick().await.unwrap();
        assert_eq!((last.failed, last.requeued), (1, 0));
        assert_eq!(worker.tick().await.unwrap().claimed, 0);

        let item = engine.queue().unwrap().get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, SyncStatus::Failed);
        assert_eq!(item.retries, 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let (engine, _dir) = setup(0, false).await;
        engine.stage_write("SOUL.md", b"soul").await.unwrap();

        let classes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&classes);
        let worker = SyncWorker::new(Arc::clone(&engine), config(5))
            .unwrap()
            .on_outcome(move |outcome| {
                if let SyncOutcome::Failed { class, will_retry, .. } = outcome {
                    seen.lock().unwrap().push((*class, *will_retry));
                }
            });

        let report = worker.tick().await.unwrap();
        assert_eq!((report.failed, report.requeued), (1, 0));
        assert_eq!(*classes.lock().unwrap(), vec![(ErrorClass::NotFound, false)]);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let (engine, _dir) = setup(0, true).await;
        engine.stage_write("SOUL.md", b"soul").await.unwrap();
        let worker = SyncWorker::new(Arc::clone(&engine), config(5)).unwrap();

        worker.draining.store(true, Ordering::SeqCst);
        assert!(worker.tick().await.unwrap().skipped);
        worker.draining.store(false, Ordering::SeqCst);
        assert_eq!(worker.tick().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_requires_queue() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Keypair::generate();
        let engine = SyncEngine::new(
            MemoryLedger::new().connect(keypair.address()),
            MemoryBlobStore::new(),
            keypair,
            EngineConfig::new(dir.path()),
        )
        .unwrap();
        assert!(SyncWorker::new(Arc::new(engine), WorkerConfig::default()).is_err());
    }

    async fn engine_in_mode(mode: SyncMode, dir: &std::path::Path) -> Arc<SyncEngine<MemoryChain, MemoryBlobStore>> {
        let keypair = Keypair::generate();
        let engine = SyncEngine::new(
            MemoryLedger::new().connect(keypair.address()),
            MemoryBlobStore::new(),
            keypair,
            EngineConfig::new(dir).with_sync_mode(mode),
        )
        .unwrap()
        .with_queue(SyncQueue::open_memory().unwrap());
        engine.register().await.unwrap();
        Arc::new(engine)
    }

    #[tokio::test]
    async fn test_sync_modes_end_to_end() {
        let dir = tempfile::tempdir().unwrap();

        let on_write = engine_in_mode(SyncMode::OnWrite, dir.path()).await;
        assert!(matches!(
            on_write.handle_write("SOUL.md", b"inline").await.unwrap(),
            WriteOutcome::Anchored(_)
        ));
        assert!(SyncWorker::spawn_for(Arc::clone(&on_write), config(5)).unwrap().is_none());
        assert_eq!(on_write.queue().unwrap().counts().await.unwrap().pending, 0);

        let manual = engine_in_mode(SyncMode::Manual, dir.path()).await;
        assert!(matches!(
            manual.handle_write("SOUL.md", b"by hand").await.unwrap(),
            WriteOutcome::Staged(_)
        ));
        assert!(SyncWorker::spawn_for(Arc::clone(&manual), config(5)).unwrap().is_none());
        assert_eq!(manual.latest_version("SOUL.md").await.unwrap(), None);
        let worker = SyncWorker::new(Arc::clone(&manual), config(5)).unwrap();
        assert_eq!(worker.tick().await.unwrap().completed, 1);
        assert_eq!(manual.restore_file("SOUL.md", None).await.unwrap(), b"by hand");

        let interval = engine_in_mode(SyncMode::Interval, dir.path()).await;
        assert!(matches!(
            interval.handle_write("SOUL.md", b"in the background").await.unwrap(),
            WriteOutcome::Staged(_)
        ));
        let handle = SyncWorker::spawn_for(Arc::clone(&interval), config(5)).unwrap().unwrap();
        let mut anchored = false;
        for _ in 0..200 {
            if interval.latest_version("SOUL.md").await.unwrap() == Some(0) {
                anchored = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop().await.unwrap();
        assert!(anchored, "background worker never anchored the staged write");
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (engine, _dir) = setup(1, true).await;
        engine.stage_write("SOUL.md", b"soul").await.unwrap();

        let worker = Arc::new(SyncWorker::new(Arc::clone(&engine), config(5)).unwrap());
        let handle = Arc::clone(&worker).start();

        let queue = engine.queue().unwrap().clone();
        let mut done = false;
        for _ in 0..200 {
            if queue.counts().await.unwrap().complete == 1 {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop().await.unwrap();
        assert!(done, "worker never completed the staged write");
        assert_eq!(engine.restore_file("SOUL.md", None).await.unwrap(), b"soul");
    }
}
