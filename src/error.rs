//! Kernel error taxonomy.
//!
//! Invariant violations (wrong-state transitions, stack-overflow sentinel,
//! an already-present PTE at a fresh mapping, ...) stay `panic!`-based
//! asserts, matching the source's `panic(file, line, func, msg)` discipline.
//! This type only covers the resource-exhaustion class of failure, where
//! the original returns a sentinel (`null`, `-1`) and lets the caller decide
//! a policy.

use core::fmt;

/// Resource-exhaustion and "not supported" errors surfaced by kernel APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A physical-page pool had no free frame.
    OutOfPhysicalMemory,
    /// A virtual-address bitmap had no run of free pages of the requested
    /// length.
    OutOfVirtualAddressSpace,
    /// A task's file-descriptor table has no free slot.
    NoFreeFdSlot,
    /// A file descriptor did not name an open file.
    InvalidFd,
    /// A device did not respond within its allotted polling budget.
    DeviceTimeout,
    /// The requested operation is a named external collaborator (filesystem,
    /// `fork`, ...) that this core does not implement.
    NotSupported(&'static str),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfPhysicalMemory => write!(f, "out of physical memory"),
            Self::OutOfVirtualAddressSpace => write!(f, "out of virtual address space"),
            Self::NoFreeFdSlot => write!(f, "no free file descriptor slot"),
            Self::InvalidFd => write!(f, "invalid file descriptor"),
            Self::DeviceTimeout => write!(f, "device timed out"),
            Self::NotSupported(what) => write!(f, "not supported in this core: {what}"),
        }
    }
}

/// Convenience alias used throughout the kernel for resource-exhaustion
/// results.
pub type KernelResult<T> = Result<T, KernelError>;
