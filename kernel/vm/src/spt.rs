//! Supplemental page table: the software view of one address space.
//!
//! The hardware table answers "where is this page right now"; this one
//! answers "what is this page supposed to contain". One record per
//! declared page, keyed by page base address.

use alloc::collections::btree_map::{BTreeMap, Entry};
use alloc::sync::Arc;

use baryon_core::{SpinLock, VirtAddr};

use crate::PAGE_SIZE;
use crate::error::VmError;
use crate::mmu::SpaceId;
use crate::page::Page;

/// Shared handle to one page record.
///
/// The owning table holds the authoritative reference; the frame ring
/// holds a second one while the page is resident, so eviction can reach
/// pages of foreign address spaces. The per-record lock exists for that
/// same reason.
pub type PageRef = Arc<SpinLock<Page>>;

/// Software page metadata for one user address space.
///
/// Single-owner by contract: the process teardown and fork rules
/// guarantee exclusive access, so the table itself carries no lock.
/// Records registered here are destroyed through
/// [`VmManager`](crate::VmManager) teardown calls only.
pub struct SupplementalPageTable {
    space: SpaceId,
    pages: BTreeMap<VirtAddr, PageRef>,
}

impl SupplementalPageTable {
    /// Creates an empty table for `space`.
    #[must_use]
    pub fn new(space: SpaceId) -> Self {
        Self {
            space,
            pages: BTreeMap::new(),
        }
    }

    /// The address space this table describes.
    #[must_use]
    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// Finds the record covering `va`. Any byte within the page finds
    /// the same record.
    #[must_use]
    pub fn find(&self, va: VirtAddr) -> Option<PageRef> {
        self.pages.get(&va.align_down(PAGE_SIZE as u64)).cloned()
    }

    /// Registers `page`. Fails with [`VmError::DuplicateEntry`] and
    /// leaves the table unchanged if the page's slot is already taken.
    pub fn insert(&mut self, page: Page) -> Result<PageRef, VmError> {
        debug_assert_eq!(
            page.space(),
            self.space,
            "page {} belongs to another space",
            page.va()
        );
        match self.pages.entry(page.va()) {
            Entry::Occupied(_) => Err(VmError::DuplicateEntry),
            Entry::Vacant(e) => {
                let page = Arc::new(SpinLock::new(page));
                e.insert(page.clone());
                Ok(page)
            }
        }
    }

    /// Unregisters the record covering `va` and hands it to the caller
    /// for teardown.
    pub fn take(&mut self, va: VirtAddr) -> Option<PageRef> {
        self.pages.remove(&va.align_down(PAGE_SIZE as u64))
    }

    /// Iterates all records in address order.
    pub fn iter(&self) -> impl Iterator<Item = &PageRef> {
        self.pages.values()
    }

    /// Empties the table, yielding every record (teardown).
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = PageRef> + use<> {
        core::mem::take(&mut self.pages).into_values()
    }

    /// Number of registered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// `true` if no pages are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
