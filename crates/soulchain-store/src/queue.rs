//! Durable sync queue backed by SQLite.
//!
//! Staged writes wait here until a worker uploads and anchors them. The
//! queue is a FIFO by insertion sequence. Claims are atomic in the database,
//! so several handles on one file never hand out the same item twice.
//!
//! Each handle owns one connection behind a mutex, and every call runs on
//! the blocking pool via `spawn_blocking`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use soulchain_core::{now_millis, Digest, DocType, Ed25519Signature};

use crate::error::{Result, StoreError};
use crate::migration;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ITEM_COLUMNS: &str = "id, doc_type, path, content_hash, encrypted_payload, signature, \
                            status, retries, last_error, created_at, updated_at";

/// Lifecycle of a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Processing => "processing",
            SyncStatus::Complete => "complete",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "processing" => Ok(SyncStatus::Processing),
            "complete" => Ok(SyncStatus::Complete),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(StoreError::InvalidData(format!("unknown sync status {other:?}"))),
        }
    }
}

/// A write to be queued.
#[derive(Debug, Clone)]
pub struct NewSyncItem {
    pub doc_type: DocType,
    pub path: String,
    /// SHA-256 of the plaintext.
    pub content_hash: Digest,
    /// Sealed payload, opaque to the queue.
    pub encrypted_payload: Vec<u8>,
    /// Owner signature over `content_hash`.
    pub signature: Ed25519Signature,
}

/// A queued write and its processing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub id: String,
    pub doc_type: DocType,
    pub path: String,
    pub content_hash: Digest,
    pub encrypted_payload: Vec<u8>,
    pub signature: Ed25519Signature,
    pub status: SyncStatus,
    pub retries: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Number of items in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub complete: u64,
    pub failed: u64,
}

fn bad_column(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(StoreError::InvalidData(msg)))
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncItem> {
    let doc_type: String = row.get(1)?;
    let doc_type = DocType::from_str(&doc_type).map_err(|e| bad_column(1, Type::Text, e.to_string()))?;

    let content_hash: Vec<u8> = row.get(3)?;
    let content_hash: [u8; 32] = content_hash
        .try_into()
        .map_err(|_| bad_column(3, Type::Blob, "content_hash must be 32 bytes".into()))?;

    let signature: Vec<u8> = row.get(5)?;
    let signature = Ed25519Signature::try_from(signature.as_slice())
        .map_err(|e| bad_column(5, Type::Blob, e.to_string()))?;

    let status: String = row.get(6)?;
    let status = SyncStatus::from_str(&status).map_err(|e| bad_column(6, Type::Text, e.to_string()))?;

    Ok(SyncItem {
        id: row.get(0)?,
        doc_type,
        path: row.get(2)?,
        content_hash: Digest::from_bytes(content_hash),
        encrypted_payload: row.get(4)?,
        signature,
        status,
        retries: row.get(7)?,
        last_error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// SQLite-backed queue of staged writes.
#[derive(Clone)]
pub struct SyncQueue {
    conn: Arc<Mutex<Connection>>,
}

impl SyncQueue {
    /// Open (or create) a queue database at the given path.
    ///
    /// File databases run in WAL mode so readers never block the claiming
    /// writer.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory queue. Nothing survives the handle.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await?
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Producer side
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an item as `pending` and return its id.
    pub async fn enqueue(&self, item: NewSyncItem) -> Result<String> {
        self.run(move |conn| {
            let id = Uuid::new_v4().to_string();
            let now = now_millis();
            conn.execute(
                "INSERT INTO sync_queue (
                    id, doc_type, path, content_hash, encrypted_payload, signature,
                    status, retries, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?7)",
                params![
                    id,
                    item.doc_type.name(),
                    item.path,
                    item.content_hash.as_bytes().as_slice(),
                    item.encrypted_payload,
                    item.signature.as_bytes().as_slice(),
                    now,
                ],
            )?;
            debug!(%id, path = %item.path, doc_type = %item.doc_type, "enqueued");
            Ok(id)
        })
        .await
    }

    /// Drop every item that a newer item for the same path supersedes.
    ///
    /// Items currently being processed are left alone. Returns the number of
    /// items removed.
    pub async fn compact(&self) -> Result<usize> {
        self.run(|conn| {
            let removed = conn.execute(
                "DELETE FROM sync_queue
                 WHERE status != 'processing'
                   AND seq < (SELECT MAX(q.seq) FROM sync_queue q WHERE q.path = sync_queue.path)",
                [],
            )?;
            if removed > 0 {
                info!(removed, "compacted sync queue");
            }
            Ok(removed)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Consumer side
    // ─────────────────────────────────────────────────────────────────────────

    /// Claim up to `limit` pending items in insertion order.
    ///
    /// An item is skipped while an earlier item of the same doc type is
    /// still `processing`, so writes to one doc type reach the ledger in the
    /// order they were staged even with several claimers. The select and the
    /// move to `processing` share one IMMEDIATE transaction, so concurrent
    /// claimers see disjoint batches.
    pub async fn dequeue(&self, limit: usize) -> Result<Vec<SyncItem>> {
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut items = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM sync_queue q
                     WHERE q.status = 'pending'
                       AND NOT EXISTS (
                           SELECT 1 FROM sync_queue p
                           WHERE p.doc_type = q.doc_type
                             AND p.status = 'processing'
                             AND p.seq < q.seq
                       )
                     ORDER BY q.seq LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit as i64], row_to_item)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let now = now_millis();
            for item in &mut items {
                tx.execute(
                    "UPDATE sync_queue SET status = 'processing', updated_at = ?2 WHERE id = ?1",
                    params![item.id, now],
                )?;
                item.status = SyncStatus::Processing;
                item.updated_at = now;
            }
            tx.commit()?;

            if !items.is_empty() {
                debug!(claimed = items.len(), "dequeued");
            }
            Ok(items)
        })
        .await
    }

    /// Mark a claimed item as done.
    pub async fn mark_complete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE sync_queue SET status = 'complete', last_error = NULL, updated_at = ?2
                 WHERE id = ?1",
                params![id, now_millis()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("queue item {id}")));
            }
            Ok(())
        })
        .await
    }

    /// Mark an item as failed, recording the error and bumping `retries`.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let id = id.to_string();
        let error = error.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE sync_queue
                 SET status = 'failed', retries = retries + 1, last_error = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, error, now_millis()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("queue item {id}")));
            }
            Ok(())
        })
        .await
    }

    /// Move a failed item back to `pending`.
    pub async fn requeue(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE sync_queue SET status = 'pending', updated_at = ?2
                 WHERE id = ?1 AND status = 'failed'",
                params![id, now_millis()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("failed queue item {id}")));
            }
            Ok(())
        })
        .await
    }

    /// Record a failed attempt on a claimed item and put it straight back
    /// to `pending`, keeping its place in the queue.
    ///
    /// Unlike [`mark_failed`](Self::mark_failed) followed by
    /// [`requeue`](Self::requeue), the item is never visible as `failed`.
    pub async fn retry(&self, id: &str, error: &str) -> Result<()> {
        let id = id.to_string();
        let error = error.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE sync_queue
                 SET status = 'pending', retries = retries + 1, last_error = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![id, error, now_millis()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("claimed queue item {id}")));
            }
            Ok(())
        })
        .await
    }

    /// Give claimed items back without counting an attempt. Returns how many
    /// were still claimed.
    pub async fn release(&self, ids: &[String]) -> Result<usize> {
        let ids = ids.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let now = now_millis();
            let mut released = 0;
            for id in &ids {
                released += tx.execute(
                    "UPDATE sync_queue SET status = 'pending', updated_at = ?2
                     WHERE id = ?1 AND status = 'processing'",
                    params![id, now],
                )?;
            }
            tx.commit()?;
            if released > 0 {
                debug!(released, "released claimed items");
            }
            Ok(released)
        })
        .await
    }

    /// Return items stuck in `processing` to `pending`.
    ///
    /// Claims do not survive a crash; call this once before a worker starts
    /// draining.
    pub async fn recover(&self) -> Result<usize> {
        self.run(|conn| {
            let recovered = conn.execute(
                "UPDATE sync_queue SET status = 'pending', updated_at = ?1
                 WHERE status = 'processing'",
                params![now_millis()],
            )?;
            if recovered > 0 {
                info!(recovered, "recovered interrupted queue items");
            }
            Ok(recovered)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Items not yet finished: pending plus processing.
    pub async fn pending(&self) -> Result<u64> {
        self.run(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'processing')",
                [],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<SyncItem>> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE id = ?1"),
                params![id],
                row_to_item,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

            let mut counts = QueueCounts::default();
            for row in rows {
                let (status, n) = row?;
                let n = n as u64;
                match SyncStatus::from_str(&status)? {
                    SyncStatus::Pending => counts.pending = n,
                    SyncStatus::Processing => counts.processing = n,
                    SyncStatus::Complete => counts.complete = n,
                    SyncStatus::Failed => counts.failed = n,
                }
            }
            Ok(counts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn item(path: &str, body: &[u8]) -> NewSyncItem {
        item_as(DocType::Memory, path, body)
    }

    fn item_as(doc_type: DocType, path: &str, body: &[u8]) -> NewSyncItem {
        NewSyncItem {
            doc_type,
            path: path.to_string(),
            content_hash: Digest::sha256(body),
            encrypted_payload: body.to_vec(),
            signature: Ed25519Signature::from_bytes([7; 64]),
        }
    }

    #[tokio::test]
    async fn test_fifo_and_claim() {
        let queue = SyncQueue::open_memory().unwrap();
        let a = queue.enqueue(item_as(DocType::Soul, "a.md", b"a")).await.unwrap();
        let b = queue.enqueue(item_as(DocType::Memory, "b.md", b"b")).await.unwrap();
        let c = queue.enqueue(item_as(DocType::User, "c.md", b"c")).await.unwrap();

        let claimed = queue.dequeue(2).await.unwrap();
        let ids: Vec<_> = claimed.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![a.clone(), b]);
        assert!(claimed.iter().all(|i| i.status == SyncStatus::Processing));

        // Claimed items are not handed out again.
        let rest = queue.dequeue(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, c);
        assert!(queue.dequeue(10).await.unwrap().is_empty());

        let fetched = queue.get(&a).await.unwrap().unwrap();
        assert_eq!(fetched.content_hash, Digest::sha256(b"a"));
        assert_eq!(fetched.signature, Ed25519Signature::from_bytes([7; 64]));
    }

    #[tokio::test]
    async fn test_fail_and_requeue() {
        let queue = SyncQueue::open_memory().unwrap();
        let id = queue.enqueue(item("a.md", b"a")).await.unwrap();
        queue.dequeue(1).await.unwrap();

        queue.mark_failed(&id, "storage unavailable").await.unwrap();
        let failed = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert_eq!(failed.retries, 1);
        assert_eq!(failed.last_error.as_deref(), Some("storage unavailable"));
        assert_eq!(queue.pending().await.unwrap(), 0);

        queue.requeue(&id).await.unwrap();
        assert_eq!(queue.pending().await.unwrap(), 1);
        let again = queue.dequeue(1).await.unwrap();
        assert_eq!(again[0].retries, 1);

        queue.mark_complete(&again[0].id).await.unwrap();
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts, QueueCounts { complete: 1, ..Default::default() });

        // Only failed items can be requeued.
        assert!(matches!(queue.requeue(&id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(queue.mark_complete("nope").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_doc_type_waits_for_earlier_claim() {
        let queue = SyncQueue::open_memory().unwrap();
        let first = queue.enqueue(item("MEMORY.md", b"one")).await.unwrap();
        let second = queue.enqueue(item("MEMORY.md", b"two")).await.unwrap();
        let soul = queue.enqueue(item_as(DocType::Soul, "SOUL.md", b"s")).await.unwrap();

        assert_eq!(queue.dequeue(1).await.unwrap()[0].id, first);

        // The second memory write must not overtake the first.
        let other = queue.dequeue(10).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].id, soul);

        queue.retry(&first, "gateway timeout").await.unwrap();
        let retried = queue.get(&first).await.unwrap().unwrap();
        assert_eq!(retried.status, SyncStatus::Pending);
        assert_eq!(retried.retries, 1);
        assert_eq!(retried.last_error.as_deref(), Some("gateway timeout"));

        // Once back in line, the first write is claimed ahead of the second.
        let ids: Vec<_> = queue.dequeue(10).await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![first.clone(), second.clone()]);

        // Only claimed items can be retried or released.
        assert_eq!(queue.release(&[second.clone(), soul.clone()]).await.unwrap(), 2);
        assert_eq!(queue.release(&[second.clone()]).await.unwrap(), 0);
        assert!(matches!(queue.retry(&second, "x").await, Err(StoreError::NotFound(_))));
        assert_eq!(queue.get(&second).await.unwrap().unwrap().retries, 0);
    }

    #[tokio::test]
    async fn test_compact_keeps_newest_per_path() {
        let queue = SyncQueue::open_memory().unwrap();
        queue.enqueue(item("SOUL.md", b"v1")).await.unwrap();
        queue.enqueue(item("SOUL.md", b"v2")).await.unwrap();
        queue.enqueue(item("MEMORY.md", b"m")).await.unwrap();
        let newest = queue.enqueue(item("SOUL.md", b"v3")).await.unwrap();

        assert_eq!(queue.compact().await.unwrap(), 2);
        assert_eq!(queue.pending().await.unwrap(), 2);

        let items = queue.dequeue(10).await.unwrap();
        let soul: Vec<_> = items.iter().filter(|i| i.path == "SOUL.md").collect();
        assert_eq!(soul.len(), 1);
        assert_eq!(soul[0].id, newest);
        assert_eq!(soul[0].encrypted_payload, b"v3");
    }

    #[tokio::test]
    async fn test_recover_interrupted_claims() {
        let queue = SyncQueue::open_memory().unwrap();
        queue.enqueue(item("a.md", b"a")).await.unwrap();
        queue.dequeue(1).await.unwrap();

        assert_eq!(queue.recover().await.unwrap(), 1);
        assert_eq!(queue.dequeue(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let id = {
            let queue = SyncQueue::open(&path).unwrap();
            queue.enqueue(item("a.md", b"a")).await.unwrap()
        };

        let queue = SyncQueue::open(&path).unwrap();
        assert_eq!(queue.get(&id).await.unwrap().unwrap().path, "a.md");
        assert_eq!(queue.pending().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dequeue_never_double_claims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let producer = SyncQueue::open(&path).unwrap();
        for i in 0..40u8 {
            let doc_type = DocType::ALL[i as usize % DocType::ALL.len()];
            producer
                .enqueue(item_as(doc_type, &format!("{i}.md"), &[i]))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = SyncQueue::open(&path).unwrap();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                loop {
                    let batch = queue.dequeue(3).await.unwrap();
                    if batch.is_empty() {
                        // Another claimer may still hold an earlier item.
                        if queue.pending().await.unwrap() == 0 {
                            break;
                        }
                        tokio::task::yield_now().await;
                        continue;
                    }
                    for item in batch {
                        queue.mark_complete(&item.id).await.unwrap();
                        claimed.push(item.id);
                    }
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 40);
        assert_eq!(unique.len(), 40);
    }
}
