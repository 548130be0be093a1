//! Physical addresses and frame numbers.
//!
//! A frame is identified by its number, `address / FRAME_SIZE`. Frame numbers
//! index the reference-count table and the free-list link table directly.

use core::fmt;
use core::ops::{Add, AddAssign};

/// log2 of [`FRAME_SIZE`].
pub const FRAME_SHIFT: u32 = 12;

/// Size of one physical frame in bytes.
pub const FRAME_SIZE: u64 = 1 << FRAME_SHIFT;

/// Physical memory address.
///
/// Carries physical intent only; nothing here dereferences it. Turning a
/// physical address into something writable is the job of
/// [`FrameMemory`](crate::memory::FrameMemory).
///
/// ```
/// # use kernel_frames::{PhysAddr, FRAME_SIZE};
/// let pa = PhysAddr::new(0x8020_1234);
/// assert!(!pa.is_frame_aligned());
/// assert_eq!(pa.align_down().as_u64(), 0x8020_1000);
/// assert_eq!(pa.align_up().as_u64(), 0x8020_2000);
/// assert_eq!(pa.align_up().as_u64() % FRAME_SIZE, 0);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(u64);

impl PhysAddr {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether the low [`FRAME_SHIFT`] bits are clear.
    #[inline]
    #[must_use]
    pub const fn is_frame_aligned(self) -> bool {
        self.0 & (FRAME_SIZE - 1) == 0
    }

    /// Round down to the start of the containing frame.
    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !(FRAME_SIZE - 1))
    }

    /// Round up to the next frame boundary (unchanged if already aligned).
    ///
    /// Saturates to the last frame boundary instead of wrapping at the top
    /// of the address space.
    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Self {
        match self.0.checked_add(FRAME_SIZE - 1) {
            Some(v) => Self(v & !(FRAME_SIZE - 1)),
            None => Self(u64::MAX & !(FRAME_SIZE - 1)),
        }
    }

    /// Number of the frame containing this address.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn frame_number(self) -> FrameNumber {
        // The kernel targets 64-bit only; usize holds any frame number.
        FrameNumber((self.0 >> FRAME_SHIFT) as usize)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for PhysAddr {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for PhysAddr {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysAddr {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// Index of a physical frame: its start address divided by [`FRAME_SIZE`].
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameNumber(usize);

impl FrameNumber {
    #[inline]
    #[must_use]
    pub const fn new(n: usize) -> Self {
        Self(n)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    /// First byte of the frame.
    #[inline]
    #[must_use]
    pub const fn start_address(self) -> PhysAddr {
        PhysAddr((self.0 as u64) << FRAME_SHIFT)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame#{} ({})", self.0, self.start_address())
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {} at {}", self.0, self.start_address())
    }
}
