// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing how a cache has been serving requests.
///
/// Obtained from [`BlockCache::stats`](crate::BlockCache::stats). Counters are sampled
/// independently, so a snapshot taken under concurrent load is not a single point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found their block already resident.
    pub hits: u64,
    /// Misses satisfied by recycling an entry of the block's own shard.
    pub recycles: u64,
    /// Misses satisfied by moving an entry over from another shard.
    pub migrations: u64,
    /// Completed device reads.
    pub disk_reads: u64,
    /// Completed device writes.
    pub disk_writes: u64,
}

impl CacheStats {
    /// Total number of lookups that did not find their block resident.
    #[must_use]
    pub const fn misses(&self) -> u64 {
        self.recycles + self.migrations
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    recycles: AtomicU64,
    migrations: AtomicU64,
    disk_reads: AtomicU64,
    disk_writes: AtomicU64,
}

impl Counters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn recycle(&self) {
        self.recycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn migration(&self) {
        self.migrations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn disk_read(&self) {
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn disk_write(&self) {
        self.disk_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
            migrations: self.migrations.load(Ordering::Relaxed),
            disk_reads: self.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
        }
    }
}
