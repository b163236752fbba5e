//! Per-page backing state.
//!
//! Every virtual page a user space declares is described by one [`Page`]
//! record. A record starts out as [`Backing::Uninit`], a promise of what
//! the page will contain, and adopts its concrete backing on the first
//! claim. That transition happens exactly once and never reverses; from
//! then on only the concrete variant's swap-in/swap-out behavior applies.

use alloc::sync::Arc;
use core::mem;

use baryon_core::{PhysAddr, VirtAddr, kerr};

use crate::PAGE_SIZE;
use crate::error::VmError;
use crate::mmu::SpaceId;
use crate::storage::{BlockDevice, FileRegion};
use crate::swap::{SwapSlot, SwapStore};

/// Content initializer run once against the freshly claimed frame.
///
/// Returns `false` to report failure, which abandons the claim. Shared
/// by `Arc` so address-space copies reuse it; each record consumes its
/// own invocation.
pub type PageInit = Arc<dyn Fn(&mut [u8; PAGE_SIZE]) -> bool + Send + Sync>;

/// The concrete backing an unclaimed page adopts on first touch.
#[derive(Clone)]
pub enum Target {
    /// Zero-filled memory, parked in the swap store under pressure.
    Anon,
    /// A window of a file region.
    File(FileSlice),
}

/// A byte window of a [`FileRegion`].
#[derive(Clone)]
pub struct FileSlice {
    region: Arc<dyn FileRegion>,
    offset: u64,
    len: usize,
}

impl FileSlice {
    /// Describes `len` valid bytes at `offset`; the page tail beyond
    /// `len` reads as zero and is never written back.
    pub fn new(region: Arc<dyn FileRegion>, offset: u64, len: usize) -> Self {
        debug_assert!(len <= PAGE_SIZE, "file slice of {len} bytes exceeds a page");
        Self { region, offset, len }
    }
}

/// Backing state of one page.
pub enum Backing {
    /// Declared but never touched.
    Uninit {
        /// Concrete backing adopted on first claim.
        target: Target,
        /// Run once against the fresh frame; `None` after consumption.
        init: Option<PageInit>,
    },
    /// Zero-fill memory; evicted copies live in a swap slot.
    Anon {
        /// Slot holding the evicted copy. A resident page owns no slot.
        slot: Option<SwapSlot>,
    },
    /// A window of a file region.
    File {
        /// The window this page mirrors.
        src: FileSlice,
        /// Set when the frame may diverge from the file; cleared by a
        /// successful write-back.
        dirty: bool,
    },
}

/// Discriminates backing variants without exposing their payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    /// Declared, never claimed.
    Uninit,
    /// Anonymous memory.
    Anon,
    /// File-backed memory.
    File,
}

/// Metadata for one virtual page of one address space.
///
/// Owned by the supplemental page table of its space; the frame ring
/// holds a second reference while the page is resident. The record is
/// freed by table teardown only, never by the frame layer.
pub struct Page {
    va: VirtAddr,
    space: SpaceId,
    writable: bool,
    frame: Option<PhysAddr>,
    backing: Backing,
}

impl Page {
    /// Declares a lazily backed page.
    pub fn new_uninit(
        space: SpaceId,
        va: VirtAddr,
        writable: bool,
        target: Target,
        init: Option<PageInit>,
    ) -> Self {
        debug_assert!(va.is_aligned(PAGE_SIZE as u64), "unaligned page base {va}");
        Self {
            va,
            space,
            writable,
            frame: None,
            backing: Backing::Uninit { target, init },
        }
    }

    /// Declares a zero-fill anonymous page with no deferred work.
    pub fn new_anon(space: SpaceId, va: VirtAddr, writable: bool) -> Self {
        debug_assert!(va.is_aligned(PAGE_SIZE as u64), "unaligned page base {va}");
        Self {
            va,
            space,
            writable,
            frame: None,
            backing: Backing::Anon { slot: None },
        }
    }

    /// Base address of the page.
    #[must_use]
    pub fn va(&self) -> VirtAddr {
        self.va
    }

    /// The address space this page belongs to.
    #[must_use]
    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// Whether user mappings of this page are writable.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// The bound frame while resident.
    #[must_use]
    pub fn frame(&self) -> Option<PhysAddr> {
        self.frame
    }

    /// `true` while the page's contents live in a frame.
    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    /// The current backing variant.
    #[must_use]
    pub fn kind(&self) -> BackingKind {
        match self.backing {
            Backing::Uninit { .. } => BackingKind::Uninit,
            Backing::Anon { .. } => BackingKind::Anon,
            Backing::File { .. } => BackingKind::File,
        }
    }

    pub(crate) fn bind_frame(&mut self, frame: PhysAddr) {
        debug_assert!(self.frame.is_none(), "page {} is already resident", self.va);
        self.frame = Some(frame);
    }

    pub(crate) fn unbind_frame(&mut self) {
        debug_assert!(self.frame.is_some(), "page {} has no frame to unbind", self.va);
        self.frame = None;
    }

    /// Populates `buf`, the page's freshly bound frame, from the
    /// backing.
    ///
    /// The first claim of an `Uninit` record adopts the concrete variant
    /// here, then runs the one-shot initializer if one was supplied or
    /// falls back to the adopted variant's own fill (anonymous: zeroes;
    /// file: region read with a zeroed tail). Anonymous pages returning
    /// from swap release their slot on success.
    pub(crate) fn swap_in<D: BlockDevice>(
        &mut self,
        swap: &SwapStore<D>,
        buf: &mut [u8; PAGE_SIZE],
    ) -> Result<(), VmError> {
        let init = if matches!(self.backing, Backing::Uninit { .. }) {
            let Backing::Uninit { target, init } =
                mem::replace(&mut self.backing, Backing::Anon { slot: None })
            else {
                unreachable!()
            };
            self.backing = match target {
                Target::Anon => Backing::Anon { slot: None },
                Target::File(src) => Backing::File { src, dirty: false },
            };
            init
        } else {
            None
        };

        if let Some(init) = init {
            if !init(buf) {
                return Err(VmError::DeviceError);
            }
        } else {
            match &mut self.backing {
                // Adopted above; a record never returns to Uninit.
                Backing::Uninit { .. } => unreachable!(),
                Backing::Anon { slot } => {
                    if let Some(s) = *slot {
                        swap.read_slot(s, buf)?;
                        swap.free_slot(s);
                        *slot = None;
                    } else {
                        buf.fill(0);
                    }
                }
                Backing::File { src, .. } => {
                    src.region.read_at(src.offset, &mut buf[..src.len])?;
                    buf[src.len..].fill(0);
                }
            }
        }

        // The hardware seam exposes no dirty bit, so a writable claim is
        // assumed to modify a file page.
        if let Backing::File { dirty, .. } = &mut self.backing {
            *dirty = self.writable;
        }
        Ok(())
    }

    /// Applies the writable-claim assumption to a page whose frame was
    /// filled outside [`swap_in`](Self::swap_in), as in an address-space
    /// copy.
    pub(crate) fn mark_dirty(&mut self) {
        if let Backing::File { dirty, .. } = &mut self.backing {
            *dirty = self.writable;
        }
    }

    /// Saves the frame contents ahead of losing the frame.
    ///
    /// Anonymous pages reserve a swap slot and record it; file pages
    /// write back only if dirty. Failure leaves the record unchanged so
    /// the caller can abort the eviction.
    pub(crate) fn swap_out<D: BlockDevice>(
        &mut self,
        swap: &SwapStore<D>,
        buf: &[u8; PAGE_SIZE],
    ) -> Result<(), VmError> {
        match &mut self.backing {
            Backing::Uninit { .. } => {
                panic!("vm: swap_out of unclaimed page {}", self.va)
            }
            Backing::Anon { slot } => {
                debug_assert!(slot.is_none(), "resident page {} owns a slot", self.va);
                let s = swap.allocate_slot().ok_or(VmError::AllocationExhausted)?;
                if let Err(e) = swap.write_slot(s, buf) {
                    swap.free_slot(s);
                    return Err(e);
                }
                *slot = Some(s);
                Ok(())
            }
            Backing::File { src, dirty } => {
                if *dirty {
                    src.region.write_at(src.offset, &buf[..src.len])?;
                    *dirty = false;
                }
                Ok(())
            }
        }
    }

    /// Releases backing-private resources: a parked swap slot, dirty
    /// file contents (flushed from `frame`), the unconsumed initializer.
    ///
    /// Detaching the frame itself is the owner's job; see
    /// [`VmManager::destroy_table`](crate::VmManager::destroy_table).
    pub(crate) fn destroy<D: BlockDevice>(
        &mut self,
        swap: &SwapStore<D>,
        frame: Option<&[u8; PAGE_SIZE]>,
    ) {
        match &mut self.backing {
            Backing::Uninit { .. } => {}
            Backing::Anon { slot } => {
                if let Some(s) = slot.take() {
                    swap.free_slot(s);
                }
            }
            Backing::File { src, dirty } => {
                if *dirty {
                    debug_assert!(frame.is_some(), "dirty page {} has no frame", self.va);
                    if let Some(buf) = frame {
                        if let Err(e) = src.region.write_at(src.offset, &buf[..src.len]) {
                            // Teardown has no failure channel; the data is
                            // lost.
                            kerr!("vm: dropping dirty page {}: {}", self.va, e);
                        }
                    }
                }
            }
        }
    }

    /// Builds the counterpart record for an address-space copy: the same
    /// declaration with no contents. Unclaimed pages share the
    /// initializer; claimed pages get their bytes copied by the manager
    /// once the twin holds a frame. A file twin starts clean until that
    /// copy lands.
    pub(crate) fn fork_blank(&self, space: SpaceId) -> Page {
        let backing = match &self.backing {
            Backing::Uninit { target, init } => Backing::Uninit {
                target: target.clone(),
                init: init.clone(),
            },
            Backing::Anon { .. } => Backing::Anon { slot: None },
            Backing::File { src, .. } => Backing::File {
                src: src.clone(),
                dirty: false,
            },
        };
        Page {
            va: self.va,
            space,
            writable: self.writable,
            frame: None,
            backing,
        }
    }
}

#[cfg(test)]
impl Page {
    pub(crate) fn swap_slot(&self) -> Option<SwapSlot> {
        match &self.backing {
            Backing::Anon { slot } => *slot,
            _ => None,
        }
    }

    pub(crate) fn file_dirty(&self) -> Option<bool> {
        match &self.backing {
            Backing::File { dirty, .. } => Some(*dirty),
            _ => None,
        }
    }

    pub(crate) fn has_init(&self) -> bool {
        matches!(&self.backing, Backing::Uninit { init: Some(_), .. })
    }
}
