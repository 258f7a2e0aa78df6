// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-shard recency lists.
//!
//! A list is an ordered container of entry handles, head first. Each handle carries the metadata
//! of its entry, so unlinking a handle hands the entry's metadata to the caller and nothing else
//! can reach it until it is linked again.

use std::collections::VecDeque;

use crate::BlockId;
use crate::entry::EntryIndex;

/// Ordering policy of a shard's recency list.
///
/// Under both policies an entry migrated in from another shard is linked at the head, while an
/// entry recycled within its own shard keeps its position. They differ in what a release does
/// and, as a consequence, where the recycling scan starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RecencyPolicy {
    /// A release never reorders the list. Recycling takes the first unreferenced entry from the
    /// head, so the order is fixed when an entry is linked and never updated on access.
    #[default]
    InsertionOrder,

    /// Releasing the last claim on an entry moves it to the head. Recycling takes the first
    /// unreferenced entry from the tail, which makes each shard an LRU list.
    MoveToFrontOnRelease,
}

/// Metadata of one entry, owned by the recency list that links it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) entry: EntryIndex,
    /// `None` until the entry is first assigned a block.
    pub(crate) id: Option<BlockId>,
    /// Whether the payload reflects the on-disk content of `id`.
    pub(crate) valid: bool,
    /// Pins plus in-flight callers.
    pub(crate) ref_count: u32,
}

impl Slot {
    pub(crate) const fn unused(entry: EntryIndex) -> Self {
        Self {
            entry,
            id: None,
            valid: false,
            ref_count: 0,
        }
    }

    pub(crate) const fn is_recyclable(&self) -> bool {
        self.ref_count == 0
    }

    /// Reassigns the entry to `id` on behalf of one caller.
    pub(crate) fn recycle(&mut self, id: BlockId) {
        debug_assert!(self.is_recyclable(), "recycling referenced entry {}", self.entry);
        self.id = Some(id);
        self.valid = false;
        self.ref_count = 1;
    }

    /// Drops the entry's block assignment, leaving it unused.
    pub(crate) fn forget(&mut self) {
        self.id = None;
        self.valid = false;
    }
}

#[derive(Debug)]
pub(crate) struct RecencyList {
    slots: VecDeque<Slot>,
    policy: RecencyPolicy,
}

impl RecencyList {
    pub(crate) fn new(policy: RecencyPolicy) -> Self {
        Self {
            slots: VecDeque::new(),
            policy,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub(crate) fn link_front(&mut self, slot: Slot) {
        self.slots.push_front(slot);
    }

    /// Finds the slot currently assigned to `id`.
    pub(crate) fn find_block(&mut self, id: BlockId) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.id == Some(id))
    }

    /// Finds the slot describing `entry`.
    pub(crate) fn find_entry(&mut self, entry: EntryIndex) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.entry == entry)
    }

    /// Position of the slot the policy would recycle next, if any slot is unreferenced.
    fn victim_position(&self) -> Option<usize> {
        match self.policy {
            RecencyPolicy::InsertionOrder => self.slots.iter().position(Slot::is_recyclable),
            RecencyPolicy::MoveToFrontOnRelease => self.slots.iter().rposition(Slot::is_recyclable),
        }
    }

    /// The slot the policy would recycle next.
    pub(crate) fn victim(&mut self) -> Option<&mut Slot> {
        let position = self.victim_position()?;
        self.slots.get_mut(position)
    }

    /// Unlinks the slot the policy would recycle next and hands it to the caller.
    pub(crate) fn detach_victim(&mut self) -> Option<Slot> {
        let position = self.victim_position()?;
        self.slots.remove(position)
    }

    /// Drops one claim on `entry` and applies the release half of the policy.
    ///
    /// Returns the remaining reference count, or `None` if `entry` is not in this list or was
    /// not referenced.
    pub(crate) fn release(&mut self, entry: EntryIndex) -> Option<u32> {
        let position = self.slots.iter().position(|slot| slot.entry == entry)?;
        let slot = &mut self.slots[position];
        slot.ref_count = slot.ref_count.checked_sub(1)?;
        let remaining = slot.ref_count;

        if remaining == 0 && self.policy == RecencyPolicy::MoveToFrontOnRelease {
            if let Some(slot) = self.slots.remove(position) {
                self.slots.push_front(slot);
            }
        }

        Some(remaining)
    }
}
