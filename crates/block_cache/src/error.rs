// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

use crate::BlockId;

/// A recoverable failure reported by a cache operation.
///
/// Only disk-driver failures are represented here. Contract violations (releasing or writing a
/// block without holding its content lock, unpinning below zero) and pool exhaustion are not
/// recoverable at this layer and abort the calling operation with a panic instead.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The device failed to fill the block. The entry stays resident and is still marked
    /// invalid, so the next fetch of the same block retries the read.
    #[error("failed to read block {id}")]
    Read {
        /// The block that was being read.
        id: BlockId,
        /// The error reported by the device.
        #[source]
        source: std::io::Error,
    },

    /// The device failed to persist the block. The cached payload is left untouched.
    #[error("failed to write block {id}")]
    Write {
        /// The block that was being written.
        id: BlockId,
        /// The error reported by the device.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Returns the block the failed operation was addressing.
    #[must_use]
    pub const fn block_id(&self) -> BlockId {
        match self {
            Self::Read { id, .. } | Self::Write { id, .. } => *id,
        }
    }
}

/// A specialized `Result` for block cache operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Read { source, .. } | Error::Write { source, .. } => source,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::io::ErrorKind;

    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Error: Send, Sync);
    }

    #[test]
    fn read_error_carries_block_and_source() {
        let e = Error::Read {
            id: BlockId::new(1, 9),
            source: std::io::Error::new(ErrorKind::UnexpectedEof, "short read"),
        };

        assert_eq!(e.to_string(), "failed to read block 1:9");
        assert_eq!(e.block_id(), BlockId::new(1, 9));
        assert_eq!(e.source().unwrap().to_string(), "short read");
    }

    #[test]
    fn into_stdio_error_unwraps_source() {
        let e = Error::Write {
            id: BlockId::new(0, 3),
            source: std::io::Error::new(ErrorKind::PermissionDenied, "read-only"),
        };

        let io_error: std::io::Error = e.into();
        assert_eq!(io_error.kind(), ErrorKind::PermissionDenied);
    }
}
