//! Paging configuration.

use baryon_core::VirtAddr;

/// Runtime configuration of a [`VmManager`](crate::VmManager).
///
/// One instance per manager; nothing here is a global. The defaults suit
/// a classic lower-half user layout with the stack at the top of the
/// user range.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Lowest virtual address usable by user mappings. Everything below
    /// stays unmapped so null dereferences fault.
    pub user_base: VirtAddr,
    /// Exclusive upper bound of the user address range.
    pub user_ceiling: VirtAddr,
    /// Exclusive top of the user stack region.
    pub stack_top: VirtAddr,
    /// Maximum distance below `stack_top` the stack may grow, in bytes.
    pub stack_max_growth: u64,
    /// How far below the saved stack pointer an access may land and
    /// still count as stack growth, in bytes. Covers push-style
    /// instructions that move the stack pointer after the access check.
    pub growth_slack: u64,
    /// Offset of the kernel's direct map of physical memory. Frame
    /// contents are read and written at `hhdm_offset + frame address`.
    pub hhdm_offset: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_base: VirtAddr::new(0x1000),
            user_ceiling: VirtAddr::new(0x0000_7FFF_FFFF_F000),
            stack_top: VirtAddr::new(0x0000_7FFF_FFFF_F000),
            stack_max_growth: 0x10_0000,
            growth_slack: 8,
            hhdm_offset: 0xFFFF_8000_0000_0000,
        }
    }
}

impl VmConfig {
    /// Returns `true` if `addr` falls inside the user address range.
    #[must_use]
    pub fn in_user_range(&self, addr: VirtAddr) -> bool {
        addr >= self.user_base && addr < self.user_ceiling
    }

    /// Returns `true` if a fault at `addr` with the stack pointer saved
    /// at `sp` qualifies for automatic stack growth: inside the growth
    /// window below `stack_top`, and at or above `sp` less the slack.
    #[must_use]
    pub fn eligible_for_growth(&self, sp: VirtAddr, addr: VirtAddr) -> bool {
        let a = addr.as_u64();
        let top = self.stack_top.as_u64();
        let floor = top.saturating_sub(self.stack_max_growth);
        a >= floor && a < top && a.wrapping_add(self.growth_slack) >= sp.as_u64()
    }
}
