//! # SoulChain Store
//!
//! Local persistence for SoulChain: where encrypted blobs live and where
//! staged writes wait for the network.
//!
//! ## Key Types
//!
//! - [`StorageAdapter`] - async, content-addressed blob storage
//! - [`MemoryBlobStore`] / [`FsBlobStore`] - in-memory and on-disk adapters
//! - [`SyncQueue`] - durable SQLite queue of staged writes
//! - [`SyncItem`] / [`SyncStatus`] - a queued write and its lifecycle
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use soulchain_store::{MemoryBlobStore, StorageAdapter, SyncQueue};
//!
//! async fn example() {
//!     let blobs = MemoryBlobStore::new();
//!     let locator = blobs.upload(Bytes::from_static(b"sealed"), "SOUL.md.enc").await.unwrap();
//!     assert!(blobs.exists(&locator).await.unwrap());
//!
//!     let queue = SyncQueue::open(".soulchain/queue.db").unwrap();
//!     let claimed = queue.dequeue(10).await.unwrap();
//!     for item in claimed {
//!         queue.mark_complete(&item.id).await.unwrap();
//!     }
//! }
//! ```

pub mod blob;
pub mod error;
pub mod migration;
pub mod queue;

pub use blob::{locator_for, FsBlobStore, MemoryBlobStore, StorageAdapter};
pub use error::{Result, StoreError};
pub use queue::{NewSyncItem, QueueCounts, SyncItem, SyncQueue, SyncStatus};
