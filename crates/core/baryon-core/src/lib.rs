//! Core types and synchronization primitives for the Baryon kernel.
//!
//! This crate contains host-testable abstractions shared across the
//! kernel tree: typed addresses, the spin lock, and the pluggable logging
//! facility. By living outside the kernel crates, these types can be
//! tested with `cargo test` on the host without a kernel target.

#![cfg_attr(not(test), no_std)]

pub mod addr;
pub mod log;
pub mod sync;

pub use addr::{PhysAddr, VirtAddr};
pub use sync::{SpinLock, SpinLockGuard};
