//! # Access to frame payloads
//!
//! The allocator never reads frame contents; it only overwrites them with
//! fill patterns (poisoning) or zeroes. Code can only write through virtual
//! addresses, and how physical memory is visible differs between the kernel
//! (a direct map at a fixed offset, or identity mapping on early boot) and
//! host tests (a plain byte buffer), so the write goes through
//! [`FrameMemory`].

use crate::addr::{FRAME_SIZE, PhysAddr};

/// Byte-level writer for whole frames.
///
/// The allocator calls [`fill`](Self::fill) only on frames that no other
/// context owns at that moment: a frame that just reached count zero, or one
/// just handed out with count one.
pub trait FrameMemory {
    /// Overwrite the [`FRAME_SIZE`] bytes starting at `frame` with `byte`.
    fn fill(&self, frame: PhysAddr, byte: u8);
}

impl<M: FrameMemory + ?Sized> FrameMemory for &M {
    #[inline]
    fn fill(&self, frame: PhysAddr, byte: u8) {
        (**self).fill(frame, byte);
    }
}

/// Physical memory reachable at `offset + pa` in the current address space.
///
/// An offset of zero is the identity mapping used before paging is set up.
#[derive(Debug, Copy, Clone)]
pub struct DirectMap {
    offset: u64,
}

impl DirectMap {
    /// # Safety
    /// Every frame handed to the allocator must be mapped writable at
    /// `offset + pa` for as long as the allocator exists, and nothing else may
    /// rely on the contents of frames the allocator owns.
    #[must_use]
    pub const unsafe fn new(offset: u64) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl FrameMemory for DirectMap {
    #[allow(clippy::cast_possible_truncation)]
    fn fill(&self, frame: PhysAddr, byte: u8) {
        let va = (self.offset + frame.as_u64()) as *mut u8;
        // SAFETY: `new` requires the frame to be mapped writable; the caller
        // holds the only reference to the frame.
        unsafe { core::ptr::write_bytes(va, byte, FRAME_SIZE as usize) }
    }
}
