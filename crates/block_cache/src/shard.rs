// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache shard implementation.
//!
//! A shard is one recency list behind one short-hold lock. Every method takes the lock once,
//! performs a bounded scan or update of entry metadata and releases it again; nothing here
//! blocks on I/O or on a content lock. Shards are cache-line aligned to prevent false sharing.

use parking_lot::Mutex;

use crate::BlockId;
use crate::entry::{Entry, EntryIndex, Membership};
use crate::recency::{RecencyList, RecencyPolicy, Slot};

/// Cache line size for alignment to prevent false sharing.
const CACHE_LINE_SIZE: usize = 64;

/// How a caller came to hold a claim on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// The block was already resident.
    Hit(EntryIndex),
    /// An unreferenced entry was reassigned to the block. Its payload is not valid yet.
    Recycled(EntryIndex),
}

#[cfg(test)]
impl Claim {
    pub(crate) const fn entry(self) -> EntryIndex {
        match self {
            Self::Hit(entry) | Self::Recycled(entry) => entry,
        }
    }
}

/// One partition of the cache table.
///
/// Aligned to the CPU cache line (64 bytes) to prevent cache-line bouncing between locks.
#[repr(align(64))]
#[derive(Debug)]
pub(crate) struct Shard {
    index: usize,
    /// Guards the list structure and the metadata of every entry it links.
    list: Mutex<RecencyList>,
    /// Explicit padding to ensure the lock of the next shard resides on a different cache line.
    _pad: [u8; CACHE_LINE_SIZE],
}

impl Shard {
    pub(crate) fn new(index: usize, policy: RecencyPolicy) -> Self {
        Self {
            index,
            list: Mutex::new(RecencyList::new(policy)),
            _pad: [0; CACHE_LINE_SIZE],
        }
    }

    pub(crate) const fn index(&self) -> usize {
        self.index
    }

    /// Links a never-used entry during table construction.
    pub(crate) fn adopt(&self, entry: EntryIndex) {
        self.list.lock().link_front(Slot::unused(entry));
    }

    /// Claims the entry holding `id`, or recycles an unreferenced entry of this shard for it.
    ///
    /// Returns `None` if the block is not resident here and every local entry is referenced.
    pub(crate) fn claim(&self, id: BlockId) -> Option<Claim> {
        let mut list = self.list.lock();

        if let Some(slot) = list.find_block(id) {
            slot.ref_count += 1;
            return Some(Claim::Hit(slot.entry));
        }

        let slot = list.victim()?;
        slot.recycle(id);
        Some(Claim::Recycled(slot.entry))
    }

    /// Unlinks an unreferenced entry so that another shard can take it over.
    ///
    /// The returned slot is linked nowhere. Its entry stays unreachable by lookups until the
    /// slot is passed to [`attach`](Self::attach).
    pub(crate) fn detach_recyclable(&self, entries: &[Entry]) -> Option<Slot> {
        let mut list = self.list.lock();
        let slot = list.detach_victim()?;
        entries[slot.entry].set_membership(Membership::Detached);
        Some(slot)
    }

    /// Links a detached slot into this shard and claims an entry for `id`.
    ///
    /// The lookup is repeated under this shard's lock: if another caller made `id` resident
    /// while the slot was in transit, that entry is claimed instead and the slot is linked back
    /// unreferenced, so no two resident entries ever share an identity.
    pub(crate) fn attach(&self, mut slot: Slot, id: BlockId, entries: &[Entry]) -> Claim {
        let mut list = self.list.lock();

        let claim = if let Some(resident) = list.find_block(id) {
            resident.ref_count += 1;
            // The slot's old block may map to another shard; it must not stay resident here.
            slot.forget();
            Claim::Hit(resident.entry)
        } else {
            slot.recycle(id);
            Claim::Recycled(slot.entry)
        };

        entries[slot.entry].set_membership(Membership::Shard(self.index));
        list.link_front(slot);
        claim
    }

    /// Whether the payload of `entry` reflects the on-disk content of its block.
    pub(crate) fn is_valid(&self, entry: EntryIndex) -> bool {
        self.list.lock().find_entry(entry).is_some_and(|slot| slot.valid)
    }

    pub(crate) fn mark_valid(&self, entry: EntryIndex) {
        if let Some(slot) = self.list.lock().find_entry(entry) {
            slot.valid = true;
        }
    }

    /// Drops one claim on `entry`. Returns the remaining count, or `None` if this shard does not
    /// link `entry` or it was not referenced.
    pub(crate) fn release(&self, entry: EntryIndex) -> Option<u32> {
        self.list.lock().release(entry)
    }

    /// Adds a claim on the resident entry for `id`. Returns the new count, or `None` if `id` is
    /// not resident.
    pub(crate) fn pin(&self, id: BlockId) -> Option<u32> {
        let mut list = self.list.lock();
        let slot = list.find_block(id)?;
        slot.ref_count += 1;
        Some(slot.ref_count)
    }

    /// Drops one claim on the resident entry for `id` without touching recency order.
    ///
    /// Returns the remaining count, or `None` if `id` is not resident or not referenced.
    pub(crate) fn unpin(&self, id: BlockId) -> Option<u32> {
        let mut list = self.list.lock();
        let slot = list.find_block(id)?;
        slot.ref_count = slot.ref_count.checked_sub(1)?;
        Some(slot.ref_count)
    }

    pub(crate) fn ref_count(&self, id: BlockId) -> Option<u32> {
        self.list.lock().find_block(id).map(|slot| slot.ref_count)
    }

    pub(crate) fn len(&self) -> usize {
        self.list.lock().len()
    }

    /// Snapshot of the metadata of every linked entry, head first.
    pub(crate) fn slots(&self) -> Vec<Slot> {
        self.list.lock().iter().cloned().collect()
    }
}
