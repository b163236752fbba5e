//! Error taxonomy of the paging core.

use core::fmt;

/// Errors surfaced by the paging core.
///
/// Returned from the fault path, any of these is fatal to the faulting
/// process only; the kernel itself keeps running. Contract violations
/// (double frees, duplicate entries the caller just checked against) do
/// not come back as errors, they abort with a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No frame (or hardware table node, or swap slot) could be obtained
    /// and eviction produced no victim.
    AllocationExhausted,
    /// A swap or file transfer failed.
    DeviceError,
    /// The access itself was illegal: unmapped address outside the stack
    /// growth window, write through a read-only mapping, protection
    /// violation, or a user-mode touch of the kernel half.
    InvalidAccess,
    /// A mapping was declared at an address that already holds one.
    DuplicateEntry,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AllocationExhausted => "allocation exhausted",
            Self::DeviceError => "device error",
            Self::InvalidAccess => "invalid access",
            Self::DuplicateEntry => "duplicate entry",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_all_variants() {
        let cases = [
            (VmError::AllocationExhausted, "allocation exhausted"),
            (VmError::DeviceError, "device error"),
            (VmError::InvalidAccess, "invalid access"),
            (VmError::DuplicateEntry, "duplicate entry"),
        ];
        for (err, text) in cases {
            assert_eq!(format!("{err}"), text);
        }
    }

    #[test]
    fn error_equality() {
        assert_eq!(VmError::DeviceError, VmError::DeviceError);
        assert_ne!(VmError::DeviceError, VmError::InvalidAccess);
    }
}
