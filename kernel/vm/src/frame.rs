//! Physical frame ring and second-chance victim selection.
//!
//! Every frame donated to the paging core is either in the free pool or
//! registered in the ring, bound (or being bound) to a page. The ring
//! keeps registration order; a clock hand sweeps it when the pool runs
//! dry, giving recently touched pages a second chance via the hardware
//! accessed bit.

use alloc::vec::Vec;

use baryon_core::PhysAddr;

use crate::PAGE_SIZE;
use crate::mmu::Mmu;
use crate::spt::PageRef;

/// One managed frame and the page occupying it.
///
/// `occupant` is `None` while a claim or eviction is in flight; the
/// victim scan skips such frames.
struct Frame {
    addr: PhysAddr,
    occupant: Option<PageRef>,
}

/// All frames donated to the paging core.
///
/// Callers hold this behind the manager's spin lock; methods take
/// `&mut self` and never perform device I/O themselves.
pub(crate) struct FrameTable {
    hhdm_offset: u64,
    pool: Vec<PhysAddr>,
    ring: Vec<Frame>,
    hand: usize,
}

impl FrameTable {
    /// Adopts `pool` as the set of managed frames. Each address must be
    /// a page-aligned frame reachable through the direct map.
    pub(crate) fn new(hhdm_offset: u64, pool: Vec<PhysAddr>) -> Self {
        debug_assert!(
            pool.iter().all(|f| f.is_aligned(PAGE_SIZE as u64)),
            "unaligned frame in donated pool"
        );
        Self {
            hhdm_offset,
            pool,
            ring: Vec::new(),
            hand: 0,
        }
    }

    /// Takes a frame from the free pool and registers it in the ring,
    /// unbound. Returns `None` when the pool is empty.
    pub(crate) fn allocate(&mut self) -> Option<PhysAddr> {
        let addr = self.pool.pop()?;
        self.ring.push(Frame {
            addr,
            occupant: None,
        });
        Some(addr)
    }

    /// Binds `page` as the occupant of the ring entry for `addr`.
    pub(crate) fn bind(&mut self, addr: PhysAddr, page: &PageRef) {
        let frame = self.entry_mut(addr);
        debug_assert!(frame.occupant.is_none(), "frame {addr} is already bound");
        frame.occupant = Some(page.clone());
    }

    /// Detaches and returns the occupant of the ring entry for `addr`.
    pub(crate) fn detach(&mut self, addr: PhysAddr) -> Option<PageRef> {
        self.entry_mut(addr).occupant.take()
    }

    /// Unregisters the ring entry for `addr` and returns the frame to
    /// the free pool. The occupant must already be detached.
    pub(crate) fn release(&mut self, addr: PhysAddr) {
        let Some(idx) = self.ring.iter().position(|f| f.addr == addr) else {
            panic!("vm: releasing unregistered frame {addr}");
        };
        let frame = self.ring.remove(idx);
        debug_assert!(frame.occupant.is_none(), "frame {addr} released while bound");
        // Keep the hand on the same logical neighbor across the splice.
        if idx < self.hand {
            self.hand -= 1;
        }
        if self.hand >= self.ring.len() {
            self.hand = 0;
        }
        self.pool.push(frame.addr);
    }

    /// Selects an eviction victim by the clock policy and detaches it
    /// from its ring entry.
    ///
    /// Starting at the hand, a frame whose occupant carries a set
    /// accessed bit gets the bit cleared and is passed over; the first
    /// occupied frame found clear is the victim, and the hand rests just
    /// past it. The sweep gives every frame two chances and returns
    /// `None` if none emerges, rather than spinning forever.
    pub(crate) fn select_victim<M: Mmu>(&mut self, mmu: &M) -> Option<(PhysAddr, PageRef)> {
        if self.ring.is_empty() {
            return None;
        }
        let len = self.ring.len();
        for _ in 0..2 * len {
            let idx = self.hand;
            self.hand = (self.hand + 1) % len;
            let frame = &mut self.ring[idx];
            let Some(page) = frame.occupant.clone() else {
                continue;
            };
            let (space, va) = {
                let p = page.lock();
                (p.space(), p.va())
            };
            if mmu.is_accessed(space, va) {
                mmu.clear_accessed(space, va);
                continue;
            }
            frame.occupant = None;
            return Some((frame.addr, page));
        }
        None
    }

    /// Returns the direct-map bytes of `frame`.
    ///
    /// # Safety
    ///
    /// `frame` must be a frame donated to this table, reachable at
    /// `hhdm_offset + frame`, and the caller must hold the table lock
    /// and ensure no other live borrow covers the same frame.
    pub(crate) unsafe fn bytes(&self, frame: PhysAddr) -> &mut [u8; PAGE_SIZE] {
        let va = self.hhdm_offset.wrapping_add(frame.as_u64());
        // SAFETY: per the contract above, the direct-map address is
        // valid, page-sized, and unaliased for the borrow's lifetime.
        unsafe { &mut *(va as *mut [u8; PAGE_SIZE]) }
    }

    /// Frames waiting in the free pool.
    pub(crate) fn frames_free(&self) -> usize {
        self.pool.len()
    }

    /// Frames registered in the ring, in-flight ones included.
    pub(crate) fn frames_in_use(&self) -> usize {
        self.ring.len()
    }

    fn entry_mut(&mut self, addr: PhysAddr) -> &mut Frame {
        match self.ring.iter_mut().find(|f| f.addr == addr) {
            Some(frame) => frame,
            None => panic!("vm: frame {addr} is not registered"),
        }
    }
}

#[cfg(test)]
impl FrameTable {
    pub(crate) fn hand(&self) -> usize {
        self.hand
    }
}
