// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::block::{BlockDevice, BlockId};
use crate::cache::BlockCache;
use crate::entry::EntryIndex;
use crate::error::{Error, Result};
use crate::sleep_lock::SleepLockGuard;

/// A claimed, content-locked cache entry.
///
/// Returned by [`BlockCache::fetch_for_read`]. While the guard exists the caller has exclusive
/// access to the block's payload, which the guard dereferences to. Other callers fetching the
/// same block sleep until the guard is released.
///
/// Releasing, either explicitly through [`release`](Self::release) or by dropping the guard,
/// gives up the caller's claim and then the content lock. The block stays cached until a later
/// miss recycles its entry.
///
/// The guard is not `Send`: a block is released by the thread that fetched it.
#[must_use = "the block is released as soon as the guard is dropped"]
pub struct BlockGuard<'a, D: BlockDevice> {
    cache: &'a BlockCache<D>,
    id: BlockId,
    entry: EntryIndex,
    content: SleepLockGuard<'a, Box<[u8]>>,
}

impl<'a, D: BlockDevice> BlockGuard<'a, D> {
    pub(crate) fn new(
        cache: &'a BlockCache<D>,
        id: BlockId,
        entry: EntryIndex,
        content: SleepLockGuard<'a, Box<[u8]>>,
    ) -> Self {
        Self {
            cache,
            id,
            entry,
            content,
        }
    }

    /// The block this guard holds.
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// The index of the cache entry holding the block.
    #[must_use]
    pub const fn entry(&self) -> EntryIndex {
        self.entry
    }

    /// Writes the current payload to the device.
    ///
    /// Reference count and shard membership are not affected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`] if the device rejects the write. The cached payload is kept.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the entry's content lock.
    pub fn write_through(&self) -> Result<()> {
        self.assert_held("write_through");

        self.cache
            .device()
            .write_block(self.id, &self.content)
            .map_err(|source| self.cache.report_io_error(Error::Write { id: self.id, source }))?;

        self.cache.counters().disk_write();
        Ok(())
    }

    /// Adds a claim that keeps this block resident after the guard is released.
    ///
    /// Equivalent to [`BlockCache::pin`] for this guard's block.
    pub fn pin(&self) {
        self.cache.pin(self.id);
    }

    /// Gives up this caller's claim and content lock.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the entry's content lock, or if the claim was
    /// already given up, for example by an [`unpin`](BlockCache::unpin) without a matching pin.
    pub fn release(self) {
        self.assert_held("release");
        drop(self);
    }

    fn assert_held(&self, operation: &'static str) {
        if !self.content.lock().is_held_by_current_thread() {
            self.cache.fatal(operation, self.id, "content lock not held by caller");
        }
    }
}

impl<D: BlockDevice> Deref for BlockGuard<'_, D> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.content
    }
}

impl<D: BlockDevice> DerefMut for BlockGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.content
    }
}

impl<D: BlockDevice> Drop for BlockGuard<'_, D> {
    fn drop(&mut self) {
        // Claim first, content lock second (when `content` drops). A recycler that picks the
        // entry in between waits on the content lock.
        self.cache.release_claim(self.id, self.entry);
    }
}

impl<D: BlockDevice> fmt::Debug for BlockGuard<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockGuard")
            .field("id", &self.id)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}
