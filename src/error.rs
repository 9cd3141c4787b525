//! Kernel error taxonomy
//!
//! Every registry, scheduler and synchronization call reports failure through
//! [`Error`]. Capacity conditions (`Full`, `Empty`) and `Timeout` are expected
//! outcomes, not faults; `IntegrityError` is fatal and halts the kernel.

use core::fmt;

/// Kernel result alias
pub type KernelResult<T> = Result<T, Error>;

/// Kernel error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Bad id, size, capacity or priority (detected before any mutation)
    InvalidParam,
    /// No free task/queue/semaphore slot, or the allocator is out of memory
    Exhausted,
    /// Queue has no free slot
    Full,
    /// Queue holds no item
    Empty,
    /// Blocking call did not complete within the allotted wait
    Timeout,
    /// Operation against an inactive or deleted object
    ResourceError,
    /// Consistency walk found a corrupted structure
    IntegrityError,
}

impl Error {
    /// Expected capacity/timing conditions a poll-and-retry loop should absorb
    pub fn is_transient(self) -> bool {
        matches!(self, Error::Full | Error::Empty | Error::Timeout)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidParam => "invalid parameter",
            Error::Exhausted => "resource exhausted",
            Error::Full => "queue full",
            Error::Empty => "queue empty",
            Error::Timeout => "timed out",
            Error::ResourceError => "object inactive or deleted",
            Error::IntegrityError => "kernel structure integrity violated",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
