//! Page-fault description and decoding.

use baryon_core::VirtAddr;
use bitflags::bitflags;

bitflags! {
    /// Hardware page-fault error code bits, as pushed by the CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCode: u64 {
        /// The translation was present; the fault is a protection
        /// violation. Clear means no translation existed.
        const PRESENT = 1 << 0;
        /// The faulting access was a write.
        const WRITE = 1 << 1;
        /// The access originated in user mode.
        const USER = 1 << 2;
    }
}

/// What kind of access faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// A load.
    Read,
    /// A store.
    Write,
}

/// Where the faulting access came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOrigin {
    /// A user-mode instruction.
    User,
    /// Kernel code dereferencing a user address (copy-in/out paths).
    Kernel,
}

/// One decoded page fault, as handed to the manager by the trap
/// dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct PageFault {
    /// The address whose touch faulted. Not necessarily page-aligned.
    pub addr: VirtAddr,
    /// Read or write.
    pub access: AccessKind,
    /// User or kernel origin.
    pub origin: FaultOrigin,
    /// `true` if a translation existed (protection violation), `false`
    /// if the page was absent.
    pub present: bool,
    /// Stack pointer saved at trap entry; consulted for automatic stack
    /// growth.
    pub sp: VirtAddr,
}

impl PageFault {
    /// Builds a descriptor from the hardware error code.
    #[must_use]
    pub fn decode(addr: VirtAddr, sp: VirtAddr, code: FaultCode) -> Self {
        Self {
            addr,
            access: if code.contains(FaultCode::WRITE) {
                AccessKind::Write
            } else {
                AccessKind::Read
            },
            origin: if code.contains(FaultCode::USER) {
                FaultOrigin::User
            } else {
                FaultOrigin::Kernel
            },
            present: code.contains(FaultCode::PRESENT),
            sp,
        }
    }

    /// Returns `true` for a write access.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self.access, AccessKind::Write)
    }

    /// Human-readable access word for diagnostics.
    #[must_use]
    pub fn access_str(&self) -> &'static str {
        match self.access {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
        }
    }
}
