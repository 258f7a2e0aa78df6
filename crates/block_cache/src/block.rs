// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Block identities and the disk-driver contract the cache is layered on.

use std::fmt;
use std::io;

/// Identifies one fixed-size block on one device.
///
/// At most one resident cache entry carries a given `BlockId` at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    /// Opaque device identifier.
    pub device: u32,
    /// Block address on that device.
    pub block: u32,
}

impl BlockId {
    /// Creates an identity for `block` on `device`.
    #[must_use]
    pub const fn new(device: u32, block: u32) -> Self {
        Self { device, block }
    }

    /// Returns the index of the shard that owns this identity in a table of `num_shards` shards.
    #[must_use]
    pub(crate) fn shard_index(self, num_shards: usize) -> usize {
        // u32 -> usize is lossless on every target we build for.
        self.block as usize % num_shards
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.block)
    }
}

/// The disk driver underneath the cache.
///
/// Both operations are synchronous from the cache's point of view: the calling thread is
/// suspended for the duration of the transfer. The cache never holds a shard lock across
/// these calls, only the content lock of the entry being transferred.
///
/// Failures are reported back to the caller of the cache operation that triggered the
/// transfer; the cache does not retry.
#[cfg_attr(test, mockall::automock)]
pub trait BlockDevice: Send + Sync {
    /// Fills `buf` with the on-disk content of `id`. `buf.len()` is the cache block size.
    ///
    /// # Errors
    ///
    /// Returns whatever error the underlying device reports.
    fn read_block(&self, id: BlockId, buf: &mut [u8]) -> io::Result<()>;

    /// Persists `buf` as the content of `id`. `buf.len()` is the cache block size.
    ///
    /// # Errors
    ///
    /// Returns whatever error the underlying device reports.
    fn write_block(&self, id: BlockId, buf: &[u8]) -> io::Result<()>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for std::sync::Arc<D> {
    fn read_block(&self, id: BlockId, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_block(id, buf)
    }

    fn write_block(&self, id: BlockId, buf: &[u8]) -> io::Result<()> {
        (**self).write_block(id, buf)
    }
}
