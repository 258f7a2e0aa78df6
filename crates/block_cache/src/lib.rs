// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A sharded, fixed-capacity disk block cache.
//!
//! This crate provides [`BlockCache`], the layer between a file system and its disk driver. It
//! keeps a fixed number of block-sized copies of disk content in memory, serves repeated reads
//! without touching the device and gives every user of a block one serialized view of its
//! content.
//!
//! # Architecture
//!
//! The cache owns a fixed table of entries, partitioned into shards by block number. Each
//! shard is a recency list of entry handles behind one short-hold lock that guards the list and
//! the metadata (identity, validity, reference count) of every entry on it. Each entry further
//! has a blocking [`SleepLock`] around its payload, held by a caller for as long as it works on
//! the block.
//!
//! A lookup proceeds in up to three steps:
//!
//! 1. **Hit:** the block's own shard links an entry assigned to the block. A claim is added
//!    under the shard lock, so the entry cannot be recycled while the caller waits for its
//!    content lock.
//! 2. **Local recycle:** otherwise the first unreferenced entry of that shard, in the order
//!    chosen by the [`RecencyPolicy`], is reassigned to the block.
//! 3. **Migration:** otherwise every shard is visited in turn for an unreferenced entry. The
//!    entry found is unlinked from its shard, becomes [`Membership::Detached`] and is linked
//!    into the block's shard. If no shard has one, the cache is exhausted, which is fatal.
//!
//! No path holds two shard locks at once, and the content lock is only waited for after every
//! shard lock has been released.
//!
//! # Access
//!
//! | Operation | Locks | Effect |
//! | :--- | :--- | :--- |
//! | [`BlockCache::fetch_for_read`] | shard, then content | Claims and locks the entry, reading the block if needed. |
//! | [`BlockGuard::write_through`] | content (held) | Writes the payload to the device. |
//! | [`BlockGuard::release`] | shard, content (held) | Drops the claim, then the content lock. |
//! | [`BlockCache::pin`] / [`BlockCache::unpin`] | shard | Adds or drops a claim without locking content. |
//!
//! # Failures
//!
//! Device errors are returned as [`Error`] and leave the cache consistent. Contract violations
//! and exhaustion of the entry pool indicate a bug in the caller population and panic after
//! being logged with [`tracing`].
//!
//! # Example
//!
//! ```
//! use block_cache::{BlockCache, BlockDevice, BlockId};
//! # use std::io;
//! # struct Disk;
//! # impl BlockDevice for Disk {
//! #     fn read_block(&self, id: BlockId, buf: &mut [u8]) -> io::Result<()> {
//! #         buf.fill(id.block as u8);
//! #         Ok(())
//! #     }
//! #     fn write_block(&self, _: BlockId, _: &[u8]) -> io::Result<()> { Ok(()) }
//! # }
//!
//! let cache = BlockCache::builder().entries(8).shards(2).block_size(512).build(Disk);
//! let log_head = BlockId::new(1, 2);
//!
//! let mut block = cache.fetch_for_read(log_head)?;
//! assert_eq!(block[0], 2);
//! block[0] = 7;
//! block.write_through()?;
//!
//! // Keep the block cached after releasing it.
//! block.pin();
//! block.release();
//!
//! assert_eq!(cache.ref_count(log_head), Some(1));
//! cache.unpin(log_head);
//! # Ok::<(), block_cache::Error>(())
//! ```

mod block;
mod cache;
mod entry;
mod error;
mod guard;
mod recency;
mod shard;
mod sleep_lock;
mod stats;

#[cfg(any(test, feature = "test-util"))]
mod testing;

pub use block::{BlockDevice, BlockId};
pub use cache::{BlockCache, BlockCacheBuilder};
pub use entry::{EntryIndex, Membership};
pub use error::{Error, Result};
pub use guard::BlockGuard;
pub use recency::RecencyPolicy;
pub use sleep_lock::{SleepLock, SleepLockGuard};
pub use stats::CacheStats;
#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub use testing::MemDevice;
