//! Hardware page-table seam.
//!
//! The paging core never walks hardware tables itself. It identifies an
//! address space by an opaque [`SpaceId`] and goes through the [`Mmu`]
//! trait for everything the hardware knows: translations, accessed bits,
//! and the kernel/user split.

use alloc::sync::Arc;
use baryon_core::{PhysAddr, VirtAddr};
use core::fmt;

/// Identifies one user address space.
///
/// An opaque token the [`Mmu`] implementation resolves to a hardware
/// table root. Page records carry this instead of a reference to their
/// owning process, so the paging core holds no process lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SpaceId(u32);

impl SpaceId {
    /// Creates a space id from a raw value.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accessor for hardware page tables.
///
/// Implemented by the architecture layer. Every method may be called
/// against a space other than the current one (eviction scans foreign
/// spaces) and must not call back into the paging core.
pub trait Mmu {
    /// Returns `true` if the translation for `va` in `space` was touched
    /// since the accessed bit was last cleared. Untranslated addresses
    /// report `false`.
    fn is_accessed(&self, space: SpaceId, va: VirtAddr) -> bool;

    /// Clears the accessed bit of the translation for `va` in `space`.
    fn clear_accessed(&self, space: SpaceId, va: VirtAddr);

    /// Points `va` in `space` at `frame` with the given writability.
    ///
    /// Returns `false` if the hardware table could not be extended; the
    /// caller treats that as allocation exhaustion and releases the
    /// frame.
    #[must_use]
    fn install_mapping(&self, space: SpaceId, va: VirtAddr, frame: PhysAddr, writable: bool) -> bool;

    /// Removes the translation for `va` in `space`, so the next touch
    /// faults. Clearing an absent translation is a no-op.
    fn clear_mapping(&self, space: SpaceId, va: VirtAddr);

    /// Returns `true` if `va` lies in the kernel half of the canonical
    /// address space.
    fn is_kernel_address(&self, va: VirtAddr) -> bool;
}

impl<T: Mmu> Mmu for Arc<T> {
    fn is_accessed(&self, space: SpaceId, va: VirtAddr) -> bool {
        T::is_accessed(self, space, va)
    }

    fn clear_accessed(&self, space: SpaceId, va: VirtAddr) {
        T::clear_accessed(self, space, va);
    }

    fn install_mapping(&self, space: SpaceId, va: VirtAddr, frame: PhysAddr, writable: bool) -> bool {
        T::install_mapping(self, space, va, frame, writable)
    }

    fn clear_mapping(&self, space: SpaceId, va: VirtAddr) {
        T::clear_mapping(self, space, va);
    }

    fn is_kernel_address(&self, va: VirtAddr) -> bool {
        T::is_kernel_address(self, va)
    }
}
