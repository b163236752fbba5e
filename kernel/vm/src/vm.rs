//! The virtual-memory manager.
//!
//! [`VmManager`] owns the machine-wide paging state: the frame ring and
//! the swap store. Per-address-space state lives in
//! [`SupplementalPageTable`]s, created and torn down through the manager
//! so frames and swap slots never leak.
//!
//! The frame-table lock is the paging serialization point: claiming,
//! eviction, address-space copies and teardown all run under it, device
//! transfers included. A page record's own lock nests inside it, and the
//! swap bitmap lock nests innermost. Fault classification happens before
//! any lock is taken, so a fatal fault touches neither frames nor swap.

use alloc::vec::Vec;

use baryon_core::{PhysAddr, SpinLock, VirtAddr, kdebug, kerr, kinfo, ktrace, kwarn};

use crate::PAGE_SIZE;
use crate::config::VmConfig;
use crate::error::VmError;
use crate::fault::{FaultOrigin, PageFault};
use crate::frame::FrameTable;
use crate::mmu::{Mmu, SpaceId};
use crate::page::{BackingKind, Page, PageInit, Target};
use crate::spt::{PageRef, SupplementalPageTable};
use crate::storage::BlockDevice;
use crate::swap::SwapStore;

/// Demand-paging manager over an [`Mmu`] and a swap [`BlockDevice`].
///
/// One instance manages every user address space. Pages are declared
/// lazily with [`map_anon`](Self::map_anon) and
/// [`map_uninit`](Self::map_uninit) and materialize on first fault; when
/// the donated frames run out, a clock sweep evicts the least recently
/// touched page into the swap store or back to its file.
pub struct VmManager<M: Mmu, D: BlockDevice> {
    config: VmConfig,
    mmu: M,
    frames: SpinLock<FrameTable>,
    swap: SwapStore<D>,
}

impl<M: Mmu, D: BlockDevice> VmManager<M, D> {
    /// Builds a manager from the donated physical frames and the swap
    /// device.
    pub fn new(config: VmConfig, mmu: M, swap_dev: D, frames: Vec<PhysAddr>) -> Self {
        let swap = SwapStore::new(swap_dev);
        let frames = FrameTable::new(config.hhdm_offset, frames);
        kinfo!(
            "vm: managing {} frames, {} swap slots",
            frames.frames_free(),
            swap.slot_count()
        );
        Self {
            config,
            mmu,
            frames: SpinLock::new(frames),
            swap,
        }
    }

    /// The configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Creates the empty page table for a fresh address space.
    #[must_use]
    pub fn create_table(&self, space: SpaceId) -> SupplementalPageTable {
        SupplementalPageTable::new(space)
    }

    /// Declares a lazily materialized page at `va`.
    ///
    /// Nothing is allocated here; the first fault adopts `target` and
    /// runs `init` against the fresh frame. `va` may be unaligned and is
    /// normalized to its page base.
    pub fn map_uninit(
        &self,
        table: &mut SupplementalPageTable,
        va: VirtAddr,
        writable: bool,
        target: Target,
        init: Option<PageInit>,
    ) -> Result<(), VmError> {
        let base = va.align_down(PAGE_SIZE as u64);
        table
            .insert(Page::new_uninit(table.space(), base, writable, target, init))
            .map(|_| ())
    }

    /// Declares a zero-filled anonymous page at `va`.
    pub fn map_anon(
        &self,
        table: &mut SupplementalPageTable,
        va: VirtAddr,
        writable: bool,
    ) -> Result<(), VmError> {
        let base = va.align_down(PAGE_SIZE as u64);
        table
            .insert(Page::new_anon(table.space(), base, writable))
            .map(|_| ())
    }

    /// Materializes the page covering `va` right away instead of waiting
    /// for a fault. A no-op if the page is already resident.
    pub fn claim(&self, table: &SupplementalPageTable, va: VirtAddr) -> Result<(), VmError> {
        let page = table.find(va).ok_or(VmError::InvalidAccess)?;
        let mut frames = self.frames.lock();
        self.claim_locked(&mut frames, &page)
    }

    /// Resolves a page fault against `table`.
    ///
    /// Fatal faults (bad address, protection violation) return
    /// [`VmError::InvalidAccess`] without touching frames or swap; the
    /// trap dispatcher terminates the offender. An access just below the
    /// stack extends it with a fresh anonymous page before claiming.
    pub fn handle_fault(
        &self,
        table: &mut SupplementalPageTable,
        fault: &PageFault,
    ) -> Result<(), VmError> {
        let space = table.space();
        if fault.origin == FaultOrigin::User && self.mmu.is_kernel_address(fault.addr) {
            kwarn!(
                "vm: space {space} touched kernel address {} from user mode",
                fault.addr
            );
            return Err(VmError::InvalidAccess);
        }
        if !self.config.in_user_range(fault.addr) {
            kwarn!(
                "vm: space {space} faulted outside the user range at {}",
                fault.addr
            );
            return Err(VmError::InvalidAccess);
        }
        let page = match table.find(fault.addr) {
            Some(page) => page,
            None => {
                if !self.config.eligible_for_growth(fault.sp, fault.addr) {
                    kwarn!(
                        "vm: space {space} faulted on unmapped {} ({} from {:?}, sp {})",
                        fault.addr,
                        fault.access_str(),
                        fault.origin,
                        fault.sp
                    );
                    return Err(VmError::InvalidAccess);
                }
                let base = fault.addr.align_down(PAGE_SIZE as u64);
                kdebug!("vm: space {space} grows stack to {base}");
                match table.insert(Page::new_anon(space, base, true)) {
                    Ok(page) => page,
                    // find() just missed, so the slot was vacant.
                    Err(_) => panic!("vm: stack growth raced a mapping at {base}"),
                }
            }
        };
        {
            let p = page.lock();
            if fault.is_write() && !p.is_writable() {
                kwarn!("vm: space {space} wrote read-only page {}", p.va());
                return Err(VmError::InvalidAccess);
            }
        }
        if fault.present {
            kwarn!(
                "vm: space {space} protection violation at {} ({})",
                fault.addr,
                fault.access_str()
            );
            return Err(VmError::InvalidAccess);
        }
        let mut frames = self.frames.lock();
        self.claim_locked(&mut frames, &page)
    }

    /// Copies every declaration in `src` into `dst`.
    ///
    /// Unclaimed pages stay lazy and share their initializer; claimed
    /// pages get a frame in `dst` and a byte copy of their current
    /// contents, pulling evicted sources back in as needed. On failure
    /// `dst` keeps the pages copied so far, for the caller to tear down.
    pub fn copy_table(
        &self,
        dst: &mut SupplementalPageTable,
        src: &SupplementalPageTable,
    ) -> Result<(), VmError> {
        let mut frames = self.frames.lock();
        for src_ref in src.iter() {
            let twin = {
                let p = src_ref.lock();
                p.fork_blank(dst.space())
            };
            if twin.kind() == BackingKind::Uninit {
                dst.insert(twin)?;
                continue;
            }
            let (va, writable) = (twin.va(), twin.is_writable());
            let dst_ref = dst.insert(twin)?;
            let daddr = self.acquire_frame(&mut frames)?;
            if !self.mmu.install_mapping(dst.space(), va, daddr, writable) {
                frames.release(daddr);
                kerr!("vm: space {} cannot extend hardware table at {va}", dst.space());
                return Err(VmError::AllocationExhausted);
            }
            // The twin's ring entry stays unbound while the source is
            // brought in, so the victim sweep cannot take it.
            if let Err(e) = self.claim_locked(&mut frames, src_ref) {
                self.mmu.clear_mapping(dst.space(), va);
                frames.release(daddr);
                return Err(e);
            }
            let saddr = match src_ref.lock().frame() {
                Some(addr) => addr,
                None => panic!("vm: source page {va} lost its frame during copy"),
            };
            // SAFETY: both frames belong to the table, the table lock is
            // held, and the addresses are distinct.
            let (dbuf, sbuf) = unsafe { (frames.bytes(daddr), frames.bytes(saddr)) };
            dbuf.copy_from_slice(&sbuf[..]);
            frames.bind(daddr, &dst_ref);
            let mut p = dst_ref.lock();
            p.bind_frame(daddr);
            // The twin's bytes came from the source frame, not its
            // region.
            p.mark_dirty();
        }
        Ok(())
    }

    /// Unmaps and destroys the page covering `va`, flushing a dirty file
    /// window and freeing any parked swap slot. Returns `false` if no
    /// page was declared there.
    pub fn remove_page(&self, table: &mut SupplementalPageTable, va: VirtAddr) -> bool {
        let Some(page) = table.take(va) else {
            return false;
        };
        let mut frames = self.frames.lock();
        self.destroy_page(&mut frames, &page);
        true
    }

    /// Tears down an address space, returning every frame and swap slot
    /// it held. Returns the number of pages destroyed.
    pub fn destroy_table(&self, mut table: SupplementalPageTable) -> usize {
        let space = table.space();
        let mut frames = self.frames.lock();
        let mut n = 0;
        for page in table.drain() {
            self.destroy_page(&mut frames, &page);
            n += 1;
        }
        kdebug!("vm: space {space} torn down, {n} pages released");
        n
    }

    /// Backing kind of the page covering `va`, if one is declared.
    #[must_use]
    pub fn page_kind(&self, table: &SupplementalPageTable, va: VirtAddr) -> Option<BackingKind> {
        table.find(va).map(|p| p.lock().kind())
    }

    /// Frames still in the free pool.
    #[must_use]
    pub fn frames_free(&self) -> usize {
        self.frames.lock().frames_free()
    }

    /// Frames bound or being bound to pages.
    #[must_use]
    pub fn frames_in_use(&self) -> usize {
        self.frames.lock().frames_in_use()
    }

    /// Swap slots not holding an evicted page.
    #[must_use]
    pub fn swap_slots_free(&self) -> usize {
        self.swap.free_slots()
    }

    /// Materializes `page`: frame, hardware mapping, contents. The frame
    /// lock is held by the caller and stays held across the populate, so
    /// nothing can evict the page half-built.
    fn claim_locked(&self, frames: &mut FrameTable, page: &PageRef) -> Result<(), VmError> {
        let (space, va, writable) = {
            let p = page.lock();
            if p.is_resident() {
                return Ok(());
            }
            (p.space(), p.va(), p.is_writable())
        };
        let addr = self.acquire_frame(frames)?;
        if !self.mmu.install_mapping(space, va, addr, writable) {
            frames.release(addr);
            kerr!("vm: space {space} cannot extend hardware table at {va}");
            return Err(VmError::AllocationExhausted);
        }
        frames.bind(addr, page);
        let mut p = page.lock();
        p.bind_frame(addr);
        // SAFETY: `addr` was just taken from this table and the table
        // lock is held for the whole populate.
        let buf = unsafe { frames.bytes(addr) };
        if let Err(e) = p.swap_in(&self.swap, buf) {
            kerr!("vm: populating {va} in space {space} failed: {e}");
            p.unbind_frame();
            drop(p);
            self.mmu.clear_mapping(space, va);
            frames.detach(addr);
            frames.release(addr);
            return Err(e);
        }
        ktrace!("vm: space {space} claims {va} -> {addr}");
        Ok(())
    }

    /// Produces a free frame, evicting a victim if the pool is dry. A
    /// failed eviction puts the victim back untouched.
    fn acquire_frame(&self, frames: &mut FrameTable) -> Result<PhysAddr, VmError> {
        if let Some(addr) = frames.allocate() {
            return Ok(addr);
        }
        let Some((addr, victim)) = frames.select_victim(&self.mmu) else {
            kerr!("vm: out of frames and no evictable page");
            return Err(VmError::AllocationExhausted);
        };
        let mut v = victim.lock();
        ktrace!("vm: evicting {} of space {} from {addr}", v.va(), v.space());
        // SAFETY: the victim's frame belongs to the table and the table
        // lock is held.
        let buf = unsafe { frames.bytes(addr) };
        if let Err(e) = v.swap_out(&self.swap, buf) {
            drop(v);
            frames.bind(addr, &victim);
            kerr!("vm: eviction of frame {addr} failed: {e}");
            return Err(e);
        }
        self.mmu.clear_mapping(v.space(), v.va());
        v.unbind_frame();
        Ok(addr)
    }

    /// Releases everything `page` holds: swap slot or dirty file bytes,
    /// the hardware mapping, and the frame.
    fn destroy_page(&self, frames: &mut FrameTable, page: &PageRef) {
        let mut p = page.lock();
        if let Some(addr) = p.frame() {
            // SAFETY: a resident page's frame belongs to the table and
            // the table lock is held.
            let buf = unsafe { frames.bytes(addr) };
            p.destroy(&self.swap, Some(&*buf));
            self.mmu.clear_mapping(p.space(), p.va());
            p.unbind_frame();
            frames.detach(addr);
            frames.release(addr);
        } else {
            p.destroy(&self.swap, None);
        }
    }
}
