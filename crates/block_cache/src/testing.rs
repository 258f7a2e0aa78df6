// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory device for tests and benchmarks.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::{BlockDevice, BlockId};

/// A [`BlockDevice`] that keeps blocks in memory.
///
/// Blocks that were never written read back as zeroes. Every completed transfer is counted,
/// and the next read or write can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemDevice {
    blocks: Mutex<HashMap<BlockId, Box<[u8]>>>,
    reads: AtomicU64,
    writes: AtomicU64,
    fail_next_read: AtomicBool,
    fail_next_write: AtomicBool,
    read_delay: Option<Duration>,
}

impl MemDevice {
    /// Creates an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every read sleep for `delay` before returning, to widen race windows in tests.
    #[must_use]
    pub const fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Stores `data` as the content of `id` without going through a cache.
    ///
    /// Reads of a block stored shorter than the buffer are zero-filled past `data`.
    pub fn put(&self, id: BlockId, data: &[u8]) {
        self.blocks.lock().insert(id, data.into());
    }

    /// Returns the stored content of `id`, if it was ever written.
    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<Vec<u8>> {
        self.blocks.lock().get(&id).map(|data| data.to_vec())
    }

    /// Number of successful reads so far.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes the next read fail with [`io::ErrorKind::Other`].
    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, Ordering::SeqCst);
    }

    /// Makes the next write fail with [`io::ErrorKind::Other`].
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }
}

impl BlockDevice for MemDevice {
    fn read_block(&self, id: BlockId, buf: &mut [u8]) -> io::Result<()> {
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }

        if self.fail_next_read.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other(format!("injected read failure on {id}")));
        }

        match self.blocks.lock().get(&id) {
            Some(data) => {
                let stored = data.len().min(buf.len());
                buf[..stored].copy_from_slice(&data[..stored]);
                buf[stored..].fill(0);
            }
            None => buf.fill(0),
        }

        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_block(&self, id: BlockId, buf: &[u8]) -> io::Result<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other(format!("injected write failure on {id}")));
        }

        self.blocks.lock().insert(id, buf.into());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_blocks_read_as_zeroes() {
        let device = MemDevice::new();
        let mut buf = [0xFF_u8; 4];

        device.read_block(BlockId::new(0, 1), &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
        assert_eq!(device.reads(), 1);
    }

    #[test]
    fn writes_round_trip_and_are_counted() {
        let device = MemDevice::new();
        device.write_block(BlockId::new(2, 3), &[1, 2, 3, 4]).unwrap();

        let mut buf = [0_u8; 4];
        device.read_block(BlockId::new(2, 3), &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(device.get(BlockId::new(2, 3)), Some(vec![1, 2, 3, 4]));
        assert_eq!(device.writes(), 1);
    }

    #[test]
    fn short_blocks_read_back_zero_padded() {
        let device = MemDevice::new();
        device.put(BlockId::new(1, 1), &[5, 6]);

        let mut buf = [0xFF_u8; 4];
        device.read_block(BlockId::new(1, 1), &mut buf).unwrap();
        assert_eq!(buf, [5, 6, 0, 0]);
    }

    #[test]
    fn injected_failures_fire_once() {
        let device = MemDevice::new();
        let mut buf = [0_u8; 2];

        device.fail_next_read();
        device.read_block(BlockId::new(0, 0), &mut buf).unwrap_err();
        device.read_block(BlockId::new(0, 0), &mut buf).unwrap();

        device.fail_next_write();
        device.write_block(BlockId::new(0, 0), &buf).unwrap_err();
        device.write_block(BlockId::new(0, 0), &buf).unwrap();

        assert_eq!(device.reads(), 1);
        assert_eq!(device.writes(), 1);
    }
}
