//! Test doubles for the hardware and device seams.
//!
//! `TestMmu` records mappings and accessed bits in plain maps, `TestDisk`
//! and `TestRegion` back transfers with byte vectors, and `host_frames`
//! donates real page-aligned heap allocations so frame contents can be
//! exercised with `hhdm_offset` zero (physical address == host pointer).

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use baryon_core::{PhysAddr, SpinLock, VirtAddr};

use crate::PAGE_SIZE;
use crate::config::VmConfig;
use crate::error::VmError;
use crate::mmu::{Mmu, SpaceId};
use crate::storage::{BLOCK_SIZE, BLOCKS_PER_PAGE, BlockDevice, FileRegion};
use crate::vm::VmManager;

#[derive(Default)]
struct MmuState {
    mappings: BTreeMap<(SpaceId, VirtAddr), (PhysAddr, bool)>,
    accessed: BTreeSet<(SpaceId, VirtAddr)>,
    deny_installs: bool,
}

/// In-memory page-table recorder.
pub(crate) struct TestMmu {
    kernel_base: u64,
    state: SpinLock<MmuState>,
}

impl TestMmu {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            kernel_base: 0xFFFF_8000_0000_0000,
            state: SpinLock::new(MmuState::default()),
        })
    }

    /// Current translation for `va`, as `(frame, writable)`.
    pub(crate) fn mapping(&self, space: SpaceId, va: VirtAddr) -> Option<(PhysAddr, bool)> {
        self.state.lock().mappings.get(&(space, va)).copied()
    }

    pub(crate) fn mapping_count(&self) -> usize {
        self.state.lock().mappings.len()
    }

    /// Marks `va` as touched, as the hardware walker would.
    pub(crate) fn set_accessed(&self, space: SpaceId, va: VirtAddr) {
        self.state.lock().accessed.insert((space, va));
    }

    /// Makes every further `install_mapping` report failure.
    pub(crate) fn deny_installs(&self) {
        self.state.lock().deny_installs = true;
    }
}

impl Mmu for TestMmu {
    fn is_accessed(&self, space: SpaceId, va: VirtAddr) -> bool {
        self.state.lock().accessed.contains(&(space, va))
    }

    fn clear_accessed(&self, space: SpaceId, va: VirtAddr) {
        self.state.lock().accessed.remove(&(space, va));
    }

    fn install_mapping(&self, space: SpaceId, va: VirtAddr, frame: PhysAddr, writable: bool) -> bool {
        let mut state = self.state.lock();
        if state.deny_installs {
            return false;
        }
        state.mappings.insert((space, va), (frame, writable));
        true
    }

    fn clear_mapping(&self, space: SpaceId, va: VirtAddr) {
        let mut state = self.state.lock();
        state.mappings.remove(&(space, va));
        state.accessed.remove(&(space, va));
    }

    fn is_kernel_address(&self, va: VirtAddr) -> bool {
        va.as_u64() >= self.kernel_base
    }
}

/// Byte-vector block device.
pub(crate) struct TestDisk {
    blocks: SpinLock<Vec<u8>>,
    fail_next: AtomicBool,
}

impl TestDisk {
    pub(crate) fn new(num_blocks: u64) -> Arc<Self> {
        Arc::new(Self {
            blocks: SpinLock::new(vec![0; num_blocks as usize * BLOCK_SIZE]),
            fail_next: AtomicBool::new(false),
        })
    }

    /// Fails the next transfer, then recovers.
    pub(crate) fn fail_next_transfer(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Raw bytes of `count` blocks starting at `start`.
    pub(crate) fn slice(&self, start: u64, count: usize) -> Vec<u8> {
        let begin = start as usize * BLOCK_SIZE;
        self.blocks.lock()[begin..begin + count * BLOCK_SIZE].to_vec()
    }
}

impl BlockDevice for TestDisk {
    fn capacity_in_blocks(&self) -> u64 {
        (self.blocks.lock().len() / BLOCK_SIZE) as u64
    }

    fn read_blocks(&self, start: u64, dest: &mut [u8]) -> Result<(), VmError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(VmError::DeviceError);
        }
        let blocks = self.blocks.lock();
        let begin = start as usize * BLOCK_SIZE;
        let end = begin + dest.len();
        if dest.len() % BLOCK_SIZE != 0 || end > blocks.len() {
            return Err(VmError::DeviceError);
        }
        dest.copy_from_slice(&blocks[begin..end]);
        Ok(())
    }

    fn write_blocks(&self, start: u64, src: &[u8]) -> Result<(), VmError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(VmError::DeviceError);
        }
        let mut blocks = self.blocks.lock();
        let begin = start as usize * BLOCK_SIZE;
        let end = begin + src.len();
        if src.len() % BLOCK_SIZE != 0 || end > blocks.len() {
            return Err(VmError::DeviceError);
        }
        blocks[begin..end].copy_from_slice(src);
        Ok(())
    }
}

/// Byte-vector file region that counts write-backs.
pub(crate) struct TestRegion {
    data: SpinLock<Vec<u8>>,
    writes: AtomicUsize,
}

impl TestRegion {
    pub(crate) fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: SpinLock::new(data),
            writes: AtomicUsize::new(0),
        })
    }

    pub(crate) fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl FileRegion for TestRegion {
    fn read_at(&self, offset: u64, dest: &mut [u8]) -> Result<(), VmError> {
        let data = self.data.lock();
        let begin = offset as usize;
        let end = begin + dest.len();
        if end > data.len() {
            return Err(VmError::DeviceError);
        }
        dest.copy_from_slice(&data[begin..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, src: &[u8]) -> Result<(), VmError> {
        let mut data = self.data.lock();
        let begin = offset as usize;
        let end = begin + src.len();
        if end > data.len() {
            return Err(VmError::DeviceError);
        }
        data[begin..end].copy_from_slice(src);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Allocates `n` page-aligned host pages to serve as frames. The pages
/// are intentionally leaked; tests are short-lived.
pub(crate) fn host_frames(n: usize) -> Vec<PhysAddr> {
    let layout = Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap();
    (0..n)
        .map(|_| {
            // SAFETY: the layout has non-zero size.
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            assert!(!ptr.is_null());
            PhysAddr::new(ptr as u64)
        })
        .collect()
}

/// Copies out the contents of a host test frame.
pub(crate) fn read_frame(addr: PhysAddr) -> [u8; PAGE_SIZE] {
    // SAFETY: `addr` came from `host_frames`, which never deallocates.
    unsafe { *(addr.as_u64() as *const [u8; PAGE_SIZE]) }
}

/// Writes `data` into a host test frame at `offset`.
pub(crate) fn write_frame(addr: PhysAddr, offset: usize, data: &[u8]) {
    assert!(offset + data.len() <= PAGE_SIZE);
    // SAFETY: as in `read_frame`; the range stays within the page.
    unsafe {
        let page = &mut *(addr.as_u64() as *mut [u8; PAGE_SIZE]);
        page[offset..offset + data.len()].copy_from_slice(data);
    }
}

/// Layout matching the defaults but with the direct map at offset zero,
/// so host pointers double as physical addresses.
pub(crate) fn test_config() -> VmConfig {
    VmConfig {
        user_base: VirtAddr::new(0x1000),
        user_ceiling: VirtAddr::new(0x7FFF_FFFF_F000),
        stack_top: VirtAddr::new(0x7FFF_FFFF_F000),
        stack_max_growth: 0x10_0000,
        growth_slack: 8,
        hhdm_offset: 0,
    }
}

/// A manager over all three doubles, with handles kept for assertions.
pub(crate) struct Harness {
    pub(crate) vm: VmManager<Arc<TestMmu>, Arc<TestDisk>>,
    pub(crate) mmu: Arc<TestMmu>,
    pub(crate) disk: Arc<TestDisk>,
}

pub(crate) fn harness(frames: usize, swap_slots: usize) -> Harness {
    let mmu = TestMmu::new();
    let disk = TestDisk::new((swap_slots * BLOCKS_PER_PAGE) as u64);
    let vm = VmManager::new(test_config(), mmu.clone(), disk.clone(), host_frames(frames));
    Harness { vm, mmu, disk }
}
