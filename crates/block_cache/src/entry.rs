// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache slots.
//!
//! Entry metadata (identity, validity, reference count) lives in the recency list of whichever
//! shard currently links the entry and is guarded by that shard's lock. What stays here is the
//! part that never moves: the payload behind its content lock, and a record of which shard (if
//! any) links the entry right now.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sleep_lock::SleepLock;

/// Position of an entry in the cache's fixed entry table.
pub type EntryIndex = usize;

/// Which shard's recency list currently links an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Membership {
    /// Linked into the recency list of the shard with this index.
    Shard(usize),
    /// Linked into no list. Only observable while a cross-shard eviction is moving the entry
    /// from its donor shard to the shard that needs it.
    Detached,
}

const DETACHED: usize = usize::MAX;

impl Membership {
    const fn encode(self) -> usize {
        match self {
            Self::Shard(index) => index,
            Self::Detached => DETACHED,
        }
    }

    const fn decode(raw: usize) -> Self {
        if raw == DETACHED {
            Self::Detached
        } else {
            Self::Shard(raw)
        }
    }
}

/// One fixed cache slot.
#[derive(Debug)]
pub(crate) struct Entry {
    /// The cached block bytes, serialized across readers and writers of the block.
    pub(crate) content: SleepLock<Box<[u8]>>,
    /// Encoded [`Membership`]. Written only while holding the lock of the shard being linked
    /// into or unlinked from.
    membership: AtomicUsize,
}

impl Entry {
    pub(crate) fn new(block_size: usize, shard: usize) -> Self {
        Self {
            content: SleepLock::new(vec![0; block_size].into_boxed_slice()),
            membership: AtomicUsize::new(Membership::Shard(shard).encode()),
        }
    }

    pub(crate) fn membership(&self) -> Membership {
        Membership::decode(self.membership.load(Ordering::Acquire))
    }

    pub(crate) fn set_membership(&self, membership: Membership) {
        self.membership.store(membership.encode(), Ordering::Release);
    }
}
