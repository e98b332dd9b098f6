//! Allocator error types.

use std::fmt;

/// Errors that can occur while allocating or freeing device memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// No hardware memory type satisfies the usage's required property flags.
    NoCompatibleMemoryType,
    /// The request is larger than the configured chunk size for its usage.
    OversizedAllocation {
        /// Requested size in bytes.
        size: u64,
        /// Maximum size a single allocation of this usage may have.
        max: u64,
    },
    /// The driver refused to allocate a new coarse memory block.
    OutOfDeviceMemory,
    /// A free was attempted with a handle that does not match a live region.
    InvalidFree,
    /// A malformed allocation request (zero size, non-power-of-two alignment).
    InvalidRequest(String),
    /// Host mapping of a coarse block failed.
    MappingFailed(String),
    /// An internal invariant was violated.
    Internal(String),
}

impl fmt::Display for AllocatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCompatibleMemoryType => write!(f, "no compatible memory type"),
            Self::OversizedAllocation { size, max } => {
                write!(f, "allocation of {size} bytes exceeds chunk size {max}")
            }
            Self::OutOfDeviceMemory => write!(f, "out of device memory"),
            Self::InvalidFree => write!(f, "invalid free: no matching live region"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::MappingFailed(msg) => write!(f, "mapping failed: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AllocatorError {}
