// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Block cache implementation.
//!
//! This module provides the main [`BlockCache`] type, its builder and the lookup/eviction
//! engine behind [`BlockCache::fetch_for_read`].

use std::sync::Arc;

use tracing::Level;

use crate::block::{BlockDevice, BlockId};
use crate::entry::{Entry, EntryIndex, Membership};
use crate::error::{Error, Result};
use crate::guard::BlockGuard;
use crate::recency::RecencyPolicy;
use crate::shard::{Claim, Shard};
use crate::sleep_lock::SleepLockGuard;
use crate::stats::{CacheStats, Counters};

/// Default number of entries: room for three maximal file-system operations of ten blocks.
const DEFAULT_ENTRIES: usize = 30;

/// Default number of shards. A prime keeps sequential block numbers spread out.
const DEFAULT_SHARDS: usize = 13;

/// Default block size in bytes.
const DEFAULT_BLOCK_SIZE: usize = 1024;

/// A fixed-capacity cache of disk blocks.
///
/// The cache owns a fixed table of entries partitioned into shards by block number. Each shard
/// keeps its entries in a recency list behind its own short-hold lock; each entry additionally
/// has a blocking content lock that serializes every user of the block it holds.
///
/// No entry is ever allocated or freed after construction. A miss recycles an unreferenced entry
/// of the block's own shard or, if that shard has none, moves one over from another shard. A
/// miss that finds no unreferenced entry anywhere is a fatal capacity failure.
///
/// Cloning is cheap and yields a handle to the same cache.
///
/// # Examples
///
/// ```
/// use block_cache::{BlockCache, BlockDevice, BlockId};
/// # use std::io;
/// # struct Disk;
/// # impl BlockDevice for Disk {
/// #     fn read_block(&self, _: BlockId, buf: &mut [u8]) -> io::Result<()> { buf.fill(0); Ok(()) }
/// #     fn write_block(&self, _: BlockId, _: &[u8]) -> io::Result<()> { Ok(()) }
/// # }
///
/// let cache = BlockCache::builder().entries(4).shards(2).block_size(16).build(Disk);
///
/// let mut block = cache.fetch_for_read(BlockId::new(1, 5)).unwrap();
/// block.fill(0xAB);
/// block.write_through().unwrap();
/// block.release();
///
/// assert_eq!(cache.fetch_for_read(BlockId::new(1, 5)).unwrap()[0], 0xAB);
/// ```
pub struct BlockCache<D> {
    inner: Arc<CacheInner<D>>,
}

struct CacheInner<D> {
    shards: Box<[Shard]>,
    entries: Box<[Entry]>,
    device: D,
    block_size: usize,
    recency: RecencyPolicy,
    counters: Counters,
}

impl<D> std::fmt::Debug for BlockCache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("entries", &self.inner.entries.len())
            .field("shards", &self.inner.shards.len())
            .field("block_size", &self.inner.block_size)
            .field("recency", &self.inner.recency)
            .finish_non_exhaustive()
    }
}

impl<D> Clone for BlockCache<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl BlockCache<()> {
    /// Creates a new builder for configuring a `BlockCache`.
    #[must_use]
    pub fn builder() -> BlockCacheBuilder {
        BlockCacheBuilder::new()
    }
}

impl<D: BlockDevice> BlockCache<D> {
    /// Returns a locked entry holding the current content of `id`.
    ///
    /// If the block is not cached, an unreferenced entry is recycled for it and filled from the
    /// device. The device read happens with only the entry's content lock held, so lookups of
    /// other blocks proceed during the I/O. Concurrent fetches of the same block share one
    /// entry: the second caller sleeps until the first releases it and then sees the content
    /// the first left behind, without another device read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Read`] if the device read fails. The entry stays resident but invalid,
    /// so a later fetch retries the read.
    ///
    /// # Panics
    ///
    /// Panics if the block is not cached and every entry of the cache is referenced.
    pub fn fetch_for_read(&self, id: BlockId) -> Result<BlockGuard<'_, D>> {
        let (entry, content) = self.acquire(id);
        let mut guard = BlockGuard::new(self, id, entry, content);

        let shard = self.shard_for(id);
        if !shard.is_valid(entry) {
            // On failure the guard drops here, releasing the claim and the content lock.
            self.inner
                .device
                .read_block(id, &mut guard)
                .map_err(|source| self.report_io_error(Error::Read { id, source }))?;

            self.inner.counters.disk_read();
            shard.mark_valid(entry);
        }

        Ok(guard)
    }

    /// Adds a claim on the resident entry for `id` without taking its content lock.
    ///
    /// A pinned block is never recycled, so its entry survives any number of independent
    /// fetch/release cycles until the matching [`unpin`](Self::unpin).
    ///
    /// # Panics
    ///
    /// Panics if `id` is not resident.
    pub fn pin(&self, id: BlockId) {
        if self.shard_for(id).pin(id).is_none() {
            self.fatal("pin", id, "block is not resident");
        }
    }

    /// Drops a claim added by [`pin`](Self::pin).
    ///
    /// # Panics
    ///
    /// Panics if `id` is not resident or has no claims left.
    pub fn unpin(&self, id: BlockId) {
        if self.shard_for(id).unpin(id).is_none() {
            self.fatal("unpin", id, "block is not resident or not pinned");
        }
    }

    /// Returns the device underneath the cache.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.inner.device
    }

    /// Finds or creates the entry for `id` and returns it content-locked, with one claim added
    /// on behalf of the caller.
    ///
    /// At most one shard lock is held at any time, and none is held while waiting for the
    /// content lock.
    fn acquire(&self, id: BlockId) -> (EntryIndex, SleepLockGuard<'_, Box<[u8]>>) {
        let home = self.shard_for(id);

        let entry = match home.claim(id) {
            Some(Claim::Hit(entry)) => {
                self.record_hit(id, entry);
                entry
            }
            Some(Claim::Recycled(entry)) => {
                self.inner.counters.recycle();
                tracing::event!(
                    name: "block_cache.recycle",
                    Level::DEBUG,
                    device = id.device,
                    block = id.block,
                    entry,
                    shard = home.index(),
                );
                entry
            }
            None => self.migrate(home, id),
        };

        (entry, self.inner.entries[entry].content.lock())
    }

    /// Moves an unreferenced entry from any shard into `home` and claims it for `id`.
    ///
    /// Shards are visited round-robin starting after `home`, one lock at a time, ending with
    /// `home` itself in case one of its entries was released since the local scan.
    fn migrate(&self, home: &Shard, id: BlockId) -> EntryIndex {
        let shards = &self.inner.shards;

        for offset in 1..=shards.len() {
            let donor = &shards[(home.index() + offset) % shards.len()];

            let Some(slot) = donor.detach_recyclable(&self.inner.entries) else {
                continue;
            };

            match home.attach(slot, id, &self.inner.entries) {
                Claim::Recycled(entry) => {
                    self.inner.counters.migration();
                    tracing::event!(
                        name: "block_cache.migrate",
                        Level::DEBUG,
                        device = id.device,
                        block = id.block,
                        entry,
                        from_shard = donor.index(),
                        to_shard = home.index(),
                    );
                    return entry;
                }
                Claim::Hit(entry) => {
                    // Another caller made the block resident while the slot was in transit.
                    self.record_hit(id, entry);
                    return entry;
                }
            }
        }

        self.fatal("fetch_for_read", id, "no recyclable entry in any shard");
    }

    fn record_hit(&self, id: BlockId, entry: EntryIndex) {
        self.inner.counters.hit();
        tracing::event!(
            name: "block_cache.hit",
            Level::TRACE,
            device = id.device,
            block = id.block,
            entry,
        );
    }

    /// Gives up one claim on `entry`, which holds `id`.
    ///
    /// A release that finds no claim to give up is fatal, unless the thread is already
    /// unwinding, in which case it is only logged.
    pub(crate) fn release_claim(&self, id: BlockId, entry: EntryIndex) {
        if self.shard_for(id).release(entry).is_some() {
            return;
        }

        if std::thread::panicking() {
            tracing::event!(
                name: "block_cache.misuse",
                Level::ERROR,
                operation = "release",
                device = id.device,
                block = id.block,
                entry,
            );
            return;
        }

        self.fatal("release", id, "released without a claim");
    }

    pub(crate) fn report_io_error(&self, error: Error) -> Error {
        let id = error.block_id();
        tracing::event!(
            name: "block_cache.io_error",
            Level::WARN,
            device = id.device,
            block = id.block,
            error = %error,
        );
        error
    }
}

impl<D> BlockCache<D> {
    fn from_parts(
        shards: Vec<Shard>,
        entries: Vec<Entry>,
        device: D,
        block_size: usize,
        recency: RecencyPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                shards: shards.into(),
                entries: entries.into(),
                device,
                block_size,
                recency,
                counters: Counters::default(),
            }),
        }
    }

    /// Returns the number of shards.
    #[must_use]
    pub fn num_shards(&self) -> usize {
        self.inner.shards.len()
    }

    /// Returns the total number of entries. Fixed for the lifetime of the cache.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns the size in bytes of every cached block.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Returns the recency policy the shards were built with.
    #[must_use]
    pub fn recency(&self) -> RecencyPolicy {
        self.inner.recency
    }

    /// Returns which shard, if any, currently links `entry`.
    ///
    /// # Panics
    ///
    /// Panics if `entry >= capacity()`.
    #[must_use]
    pub fn membership(&self, entry: EntryIndex) -> Membership {
        self.inner.entries[entry].membership()
    }

    /// Returns the number of claims on the resident entry for `id`, or `None` if `id` is not
    /// resident.
    #[must_use]
    pub fn ref_count(&self, id: BlockId) -> Option<u32> {
        self.shard_for(id).ref_count(id)
    }

    /// Returns `true` if an entry is currently assigned to `id`, referenced or not.
    #[must_use]
    pub fn is_resident(&self, id: BlockId) -> bool {
        self.ref_count(id).is_some()
    }

    /// Returns the blocks currently assigned to entries, in no particular order.
    ///
    /// This locks every shard in turn, so it may not be suitable for high-frequency calls.
    #[must_use]
    pub fn resident_blocks(&self) -> Vec<BlockId> {
        self.inner
            .shards
            .iter()
            .flat_map(Shard::slots)
            .filter_map(|slot| slot.id)
            .collect()
    }

    /// Returns the number of entries linked into shard `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= num_shards()`.
    #[must_use]
    pub fn shard_len(&self, index: usize) -> usize {
        self.inner.shards[index].len()
    }

    /// Returns a snapshot of the cache's counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.inner.counters
    }

    fn shard_for(&self, id: BlockId) -> &Shard {
        &self.inner.shards[id.shard_index(self.inner.shards.len())]
    }

    /// Reports an unrecoverable condition and aborts the calling operation.
    #[expect(clippy::panic, reason = "exhaustion and contract violations are unrecoverable")]
    pub(crate) fn fatal(&self, operation: &'static str, id: BlockId, reason: &'static str) -> ! {
        tracing::event!(
            name: "block_cache.fatal",
            Level::ERROR,
            operation,
            device = id.device,
            block = id.block,
            capacity = self.capacity(),
            reason,
        );

        panic!("{operation}: {reason} (block {id})");
    }
}

/// Builder for configuring a [`BlockCache`].
///
/// # Examples
///
/// ```
/// use block_cache::{BlockCache, BlockDevice, BlockId, RecencyPolicy};
/// # use std::io;
/// # struct Disk;
/// # impl BlockDevice for Disk {
/// #     fn read_block(&self, _: BlockId, _: &mut [u8]) -> io::Result<()> { Ok(()) }
/// #     fn write_block(&self, _: BlockId, _: &[u8]) -> io::Result<()> { Ok(()) }
/// # }
///
/// let cache = BlockCache::builder()
///     .entries(64)
///     .shards(8)
///     .block_size(4096)
///     .recency(RecencyPolicy::MoveToFrontOnRelease)
///     .build(Disk);
///
/// assert_eq!(cache.capacity(), 64);
/// assert_eq!(cache.num_shards(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct BlockCacheBuilder {
    entries: usize,
    shards: usize,
    block_size: usize,
    recency: RecencyPolicy,
}

impl Default for BlockCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockCacheBuilder {
    /// Creates a new builder with default settings.
    ///
    /// Defaults:
    /// - `entries`: 30
    /// - `shards`: 13
    /// - `block_size`: 1024
    /// - `recency`: [`RecencyPolicy::InsertionOrder`]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: DEFAULT_ENTRIES,
            shards: DEFAULT_SHARDS,
            block_size: DEFAULT_BLOCK_SIZE,
            recency: RecencyPolicy::InsertionOrder,
        }
    }

    /// Sets the total number of entries, i.e. how many blocks can be cached at once.
    #[must_use]
    pub const fn entries(mut self, entries: usize) -> Self {
        self.entries = entries;
        self
    }

    /// Sets the number of shards the entries are partitioned into.
    #[must_use]
    pub const fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Sets the size in bytes of one block.
    #[must_use]
    pub const fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets how shards order their entries for recycling.
    #[must_use]
    pub const fn recency(mut self, recency: RecencyPolicy) -> Self {
        self.recency = recency;
        self
    }

    /// Builds a cache on top of `device`.
    ///
    /// Entries are dealt round-robin across the shards, every one unassigned, unreferenced and
    /// invalid.
    ///
    /// # Panics
    ///
    /// Panics if the entry count, shard count or block size is zero.
    #[must_use]
    pub fn build<D: BlockDevice>(self, device: D) -> BlockCache<D> {
        assert!(self.entries > 0, "a block cache needs at least one entry");
        assert!(self.shards > 0, "a block cache needs at least one shard");
        assert!(self.block_size > 0, "block size must be non-zero");

        let shards: Vec<Shard> = (0..self.shards).map(|index| Shard::new(index, self.recency)).collect();

        let entries: Vec<Entry> = (0..self.entries)
            .map(|entry| {
                let shard = entry % self.shards;
                shards[shard].adopt(entry);
                Entry::new(self.block_size, shard)
            })
            .collect();

        tracing::event!(
            name: "block_cache.init",
            Level::DEBUG,
            entries = self.entries,
            shards = self.shards,
            block_size = self.block_size,
            recency = ?self.recency,
        );

        BlockCache::from_parts(shards, entries, device, self.block_size, self.recency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemDevice;

    fn cache(entries: usize, shards: usize) -> BlockCache<MemDevice> {
        BlockCache::builder()
            .entries(entries)
            .shards(shards)
            .block_size(8)
            .build(MemDevice::new())
    }

    #[test]
    fn test_cache_builder_defaults() {
        let cache = BlockCache::builder().build(MemDevice::new());

        assert_eq!(cache.capacity(), 30);
        assert_eq!(cache.num_shards(), 13);
        assert_eq!(cache.block_size(), 1024);
        assert_eq!(cache.recency(), RecencyPolicy::InsertionOrder);
    }

    #[test]
    fn entries_are_dealt_round_robin() {
        let cache = cache(7, 3);

        assert_eq!(cache.shard_len(0), 3);
        assert_eq!(cache.shard_len(1), 2);
        assert_eq!(cache.shard_len(2), 2);
        for entry in 0..7 {
            assert_eq!(cache.membership(entry), Membership::Shard(entry % 3));
        }
        assert!(cache.resident_blocks().is_empty());
    }

    #[test]
    #[should_panic(expected = "at least one shard")]
    fn zero_shards_is_rejected() {
        let _ = cache(4, 0);
    }

    #[test]
    #[should_panic(expected = "at least one entry")]
    fn zero_entries_is_rejected() {
        let _ = cache(0, 2);
    }

    #[test]
    fn miss_recycles_locally_before_migrating() {
        let cache = cache(4, 2);

        // Block 1 belongs to shard 1, which owns entries 1 and 3.
        let block = cache.fetch_for_read(BlockId::new(1, 1)).unwrap();
        assert_eq!(cache.membership(block.entry()), Membership::Shard(1));
        drop(block);

        let stats = cache.stats();
        assert_eq!(stats.recycles, 1);
        assert_eq!(stats.migrations, 0);
        assert_eq!(cache.shard_len(0), 2);
        assert_eq!(cache.shard_len(1), 2);
    }

    #[test]
    fn exhausted_shard_borrows_from_its_neighbour() {
        let cache = cache(4, 2);
        let a = cache.fetch_for_read(BlockId::new(1, 1)).unwrap();
        let b = cache.fetch_for_read(BlockId::new(1, 3)).unwrap();

        // Shard 1 is fully referenced; block 5 must take an entry from shard 0.
        let c = cache.fetch_for_read(BlockId::new(1, 5)).unwrap();
        assert_eq!(cache.membership(c.entry()), Membership::Shard(1));
        assert_eq!(cache.shard_len(0), 1);
        assert_eq!(cache.shard_len(1), 3);
        assert_eq!(cache.stats().migrations, 1);

        drop((a, b, c));
    }

    #[test]
    fn clone_shares_the_table() {
        let cache = cache(2, 1);
        let other = cache.clone();

        drop(cache.fetch_for_read(BlockId::new(0, 9)).unwrap());
        assert!(other.is_resident(BlockId::new(0, 9)));
    }

    #[test]
    fn test_cache_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BlockCache<MemDevice>>();
    }
}
