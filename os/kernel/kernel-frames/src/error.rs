//! Error taxonomy of the frame allocator.
//!
//! [`OutOfMemory`] is the only condition a caller is expected to recover
//! from. Every [`FrameError`] reported by a running allocator is a kernel
//! accounting bug; the kernel-facing operations route them to [`halt`].

use crate::addr::{FrameNumber, PhysAddr};

/// The free list was empty when a frame was requested.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("out of physical frames")]
pub struct OutOfMemory;

/// Why an address was rejected as a frame handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InvalidFrameReason {
    /// Not on a frame boundary.
    Unaligned,
    /// Below the first managed frame (e.g. inside the kernel image).
    BelowRange,
    /// At or above the top of managed physical memory.
    AboveRange,
}

impl InvalidFrameReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Unaligned => "not frame aligned",
            Self::BelowRange => "below the managed range",
            Self::AboveRange => "at or above the top of managed memory",
        }
    }
}

impl core::fmt::Display for InvalidFrameReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    /// Release of a frame whose count is already zero.
    #[error("double free of {frame}")]
    DoubleFree { frame: FrameNumber },

    #[error("invalid frame address {addr}: {reason}")]
    InvalidFrame {
        addr: PhysAddr,
        reason: InvalidFrameReason,
    },

    /// A reference count would drop below zero.
    #[error("reference count of {frame} would become negative")]
    NegativeCount { frame: FrameNumber },

    /// Sharing a frame nobody owns.
    #[error("cannot share unallocated {frame}")]
    NotAllocated { frame: FrameNumber },

    /// A frame taken from the free list still had owners.
    #[error("free-list {frame} has reference count {count}")]
    FreeFrameReferenced { frame: FrameNumber, count: u32 },

    /// An unowned frame is missing from the free list.
    #[error("{frame} has no owner but is not on the free list")]
    Leaked { frame: FrameNumber },

    /// The tables cannot index every frame of the range.
    #[error("frame tables hold {available} entries but {needed} are needed")]
    TableTooSmall { needed: usize, available: usize },

    /// Count and link tables disagree in length, or are too long to link.
    #[error("frame table mismatch: {counts} counts, {links} links")]
    TableMismatch { counts: usize, links: usize },

    /// No whole frame fits between the rounded-up start and the end.
    #[error("no whole frame in [{start}, {end})")]
    EmptyRange { start: PhysAddr, end: PhysAddr },
}

impl FrameError {
    /// Whether this error indicates corrupted frame accounting.
    ///
    /// Setup errors returned by [`FrameAllocator::new`](crate::FrameAllocator::new)
    /// are boot configuration problems and not fatal by themselves.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::TableTooSmall { .. } | Self::TableMismatch { .. } | Self::EmptyRange { .. }
        )
    }
}

/// Stop the kernel with a diagnostic naming the failing operation.
///
/// The only handler for fatal frame errors. It never returns; the panic
/// handler of the kernel takes the machine down.
#[cold]
#[track_caller]
pub fn halt(op: &'static str, err: FrameError) -> ! {
    log::error!("{op}: {err}");
    panic!("{op}: {err}");
}
