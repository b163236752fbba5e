//! Block-device and file seams for page contents.
//!
//! The swap store moves whole pages through a [`BlockDevice`]; file-backed
//! pages read and write their window of a [`FileRegion`]. Both are
//! synchronous: a paging transfer blocks the faulting thread until the
//! device completes.

use alloc::sync::Arc;

use crate::PAGE_SIZE;
use crate::error::VmError;

/// Size of one device block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Number of device blocks holding one page.
pub const BLOCKS_PER_PAGE: usize = PAGE_SIZE / BLOCK_SIZE;

/// A block-addressed device backing the swap store.
///
/// Buffer lengths must be multiples of [`BLOCK_SIZE`] and give the
/// transfer size. Implementations return [`VmError::DeviceError`] on
/// transfer failure and must not fault back into the paging core.
pub trait BlockDevice {
    /// Total device capacity in blocks.
    fn capacity_in_blocks(&self) -> u64;

    /// Reads `dest.len() / BLOCK_SIZE` blocks starting at block `start`.
    fn read_blocks(&self, start: u64, dest: &mut [u8]) -> Result<(), VmError>;

    /// Writes `src.len() / BLOCK_SIZE` blocks starting at block `start`.
    fn write_blocks(&self, start: u64, src: &[u8]) -> Result<(), VmError>;
}

impl<T: BlockDevice> BlockDevice for Arc<T> {
    fn capacity_in_blocks(&self) -> u64 {
        T::capacity_in_blocks(self)
    }

    fn read_blocks(&self, start: u64, dest: &mut [u8]) -> Result<(), VmError> {
        T::read_blocks(self, start, dest)
    }

    fn write_blocks(&self, start: u64, src: &[u8]) -> Result<(), VmError> {
        T::write_blocks(self, start, src)
    }
}

/// An open file region backing file-mapped pages.
///
/// Held as `Arc<dyn FileRegion>` so copies of an address space share the
/// same region. Offsets are byte offsets into the region; a transfer
/// covers exactly the requested range or fails with
/// [`VmError::DeviceError`].
pub trait FileRegion: Send + Sync {
    /// Fills `dest` from the region starting at byte `offset`.
    fn read_at(&self, offset: u64, dest: &mut [u8]) -> Result<(), VmError>;

    /// Writes `src` into the region starting at byte `offset`.
    fn write_at(&self, offset: u64, src: &[u8]) -> Result<(), VmError>;
}
