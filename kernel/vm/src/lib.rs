//! Demand-paged virtual memory for user address spaces.
//!
//! User pages are declared lazily: the loader registers what a page
//! *will* contain (zeroes, a file window, or the output of a one-shot
//! initializer) and the first touch faults the contents in. Under memory
//! pressure a clock sweep over the frame ring picks a victim, parks its
//! contents in a bitmap-managed swap store (or back in its file), and
//! hands the frame to the faulting page.
//!
//! Hardware and devices enter through the [`Mmu`], [`BlockDevice`] and
//! [`FileRegion`] traits, so the whole subsystem runs under `cargo test`
//! on the host with fake collaborators and real heap pages as frames.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod fault;
mod frame;
pub mod mmu;
pub mod page;
pub mod spt;
pub mod storage;
pub mod swap;
pub mod vm;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::VmConfig;
pub use error::VmError;
pub use fault::{AccessKind, FaultCode, FaultOrigin, PageFault};
pub use mmu::{Mmu, SpaceId};
pub use page::{Backing, BackingKind, FileSlice, Page, PageInit, Target};
pub use spt::{PageRef, SupplementalPageTable};
pub use storage::{BLOCK_SIZE, BLOCKS_PER_PAGE, BlockDevice, FileRegion};
pub use swap::{SwapSlot, SwapStore};
pub use vm::VmManager;

/// Size of one virtual or physical page in bytes.
pub const PAGE_SIZE: usize = 4096;
