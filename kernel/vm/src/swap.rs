//! Swap store over a block device.
//!
//! The device is carved into page-sized slots, each spanning
//! [`BLOCKS_PER_PAGE`] consecutive blocks. A word bitmap tracks which
//! slots hold evicted page images. Bit edits happen under a spin lock;
//! block transfers never do, so slot I/O can overlap with allocation.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use baryon_core::SpinLock;

use crate::PAGE_SIZE;
use crate::error::VmError;
use crate::storage::{BLOCKS_PER_PAGE, BlockDevice};

/// A page-sized reservation in the swap store.
///
/// Slot `i` covers blocks `[i * BLOCKS_PER_PAGE, (i + 1) * BLOCKS_PER_PAGE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Index of the slot within the store.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    const fn first_block(self) -> u64 {
        (self.0 * BLOCKS_PER_PAGE) as u64
    }
}

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First-fit slot bitmap. One bit per slot, set while occupied.
struct SlotBitmap {
    words: Vec<u64>,
    slots: usize,
    free: usize,
    /// Index of the first word that may contain a clear bit. Scans
    /// start here instead of at word zero.
    search_hint: usize,
}

impl SlotBitmap {
    fn new(slots: usize) -> Self {
        Self {
            words: vec![0; slots.div_ceil(64)],
            slots,
            free: slots,
            search_hint: 0,
        }
    }

    fn allocate(&mut self) -> Option<SwapSlot> {
        for word_idx in self.search_hint..self.words.len() {
            let word = self.words[word_idx];
            if word == u64::MAX {
                continue;
            }
            let bit = (!word).trailing_zeros() as usize;
            let slot = word_idx * 64 + bit;
            // Trailing bits of the last word fall past the device end.
            if slot >= self.slots {
                return None;
            }
            self.words[word_idx] |= 1 << bit;
            self.free -= 1;
            self.search_hint = word_idx;
            return Some(SwapSlot::new(slot));
        }
        None
    }

    fn release(&mut self, slot: SwapSlot) {
        let word_idx = slot.index() / 64;
        let mask = 1u64 << (slot.index() % 64);
        debug_assert!(
            self.words[word_idx] & mask != 0,
            "double free of swap slot {slot}"
        );
        self.words[word_idx] &= !mask;
        self.free += 1;
        if word_idx < self.search_hint {
            self.search_hint = word_idx;
        }
    }
}

/// Page-granular allocator and transfer front end for the swap device.
pub struct SwapStore<D: BlockDevice> {
    dev: D,
    bitmap: SpinLock<SlotBitmap>,
}

impl<D: BlockDevice> SwapStore<D> {
    /// Wraps `dev`, carving its capacity into page-sized slots. Blocks
    /// past the last whole slot go unused.
    pub fn new(dev: D) -> Self {
        let slots = (dev.capacity_in_blocks() / BLOCKS_PER_PAGE as u64) as usize;
        Self {
            dev,
            bitmap: SpinLock::new(SlotBitmap::new(slots)),
        }
    }

    /// Reserves the lowest free slot, or `None` when the store is full.
    pub fn allocate_slot(&self) -> Option<SwapSlot> {
        self.bitmap.lock().allocate()
    }

    /// Returns `slot` to the free set.
    ///
    /// Freeing a slot that is not allocated corrupts the bitmap; debug
    /// builds catch it.
    pub fn free_slot(&self, slot: SwapSlot) {
        self.bitmap.lock().release(slot);
    }

    /// Reads the page image parked in `slot` into `buf`.
    pub fn read_slot(&self, slot: SwapSlot, buf: &mut [u8; PAGE_SIZE]) -> Result<(), VmError> {
        self.dev.read_blocks(slot.first_block(), buf)
    }

    /// Writes `buf` as the page image of `slot`.
    pub fn write_slot(&self, slot: SwapSlot, buf: &[u8; PAGE_SIZE]) -> Result<(), VmError> {
        self.dev.write_blocks(slot.first_block(), buf)
    }

    /// Total slots the device provides.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.bitmap.lock().slots
    }

    /// Slots currently free.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.bitmap.lock().free
    }
}
