//! # Physical frame allocator with reference counts
//!
//! [`FrameAllocator`] hands out 4 KiB frames from a LIFO free list and keeps
//! a per-frame owner count so a frame shared by several address spaces
//! (copy-on-write after fork) is only recycled when the last owner lets go.
//!
//! ## Locking
//!
//! Two locks, always taken in this order:
//!
//! 1. `frames.free`: the free list. Held across a whole membership
//!    transition (pop + claim, or decrement-to-zero + poison + push), so no
//!    other context sees a frame with count zero that is not on the list.
//! 2. `frames.refs`: the count table. Held for one entry update only.
//!
//! [`share_frame`](FrameAllocator::share_frame) and
//! [`reference_count`](FrameAllocator::reference_count) take only the table
//! lock.
//!
//! ## Fatal errors
//!
//! The plain operations ([`release_frame`](FrameAllocator::release_frame),
//! [`share_frame`](FrameAllocator::share_frame), ...) stop the kernel through
//! [`halt`] on any accounting violation. The `try_` variants return the same
//! [`FrameError`] instead.

use crate::addr::{FRAME_SIZE, FrameNumber, PhysAddr};
use crate::error::{FrameError, InvalidFrameReason, OutOfMemory, halt};
use crate::free_list::{FreeList, MAX_FRAMES};
use crate::memory::FrameMemory;
use crate::refcount::FrameRefTable;
use core::ops::Range;
use kernel_sync::SpinLock;
use log::{debug, info, trace, warn};

/// Fill byte of a frame returned to the pool.
pub const FREE_POISON: u8 = 0x01;

/// Fill byte of a frame just handed out.
pub const ALLOC_POISON: u8 = 0x05;

/// Backing storage for the two per-frame tables.
///
/// Both slices need one entry per frame number below the end of the managed
/// range; their previous contents are discarded.
pub struct FrameTables<'a> {
    counts: &'a mut [u32],
    links: &'a mut [u32],
}

impl<'a> FrameTables<'a> {
    pub const fn new(counts: &'a mut [u32], links: &'a mut [u32]) -> Self {
        Self { counts, links }
    }

    /// Number of frame numbers the tables can index.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.counts.len()
    }
}

/// Table storage for `N` frames that can live in a `static`.
pub struct StaticFrameTables<const N: usize> {
    counts: [u32; N],
    links: [u32; N],
}

impl<const N: usize> Default for StaticFrameTables<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> StaticFrameTables<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counts: [0; N],
            links: [0; N],
        }
    }

    pub const fn tables(&mut self) -> FrameTables<'_> {
        FrameTables::new(&mut self.counts, &mut self.links)
    }
}

/// Outcome of a successful release.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Release {
    /// The last owner let go; the frame is back on the free list.
    Freed,
    /// Other owners remain; carries the remaining count.
    StillShared(u32),
}

/// Snapshot of allocator occupancy.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameStats {
    /// Frames seeded by the range initializer.
    pub total: usize,
    /// Frames on the free list.
    pub free: usize,
    /// Frames with at least one owner.
    pub allocated: usize,
}

/// The physical frame allocator.
///
/// Created once at boot through [`FrameAllocator::new`]; shared by reference
/// afterwards. There is no teardown.
pub struct FrameAllocator<'a, M> {
    free: SpinLock<FreeList<'a>>,
    refs: FrameRefTable<'a>,
    memory: M,
    /// Managed frames: `[range.start, range.end)`, both frame aligned.
    range: Range<PhysAddr>,
    managed: usize,
}

impl<'a, M: FrameMemory> FrameAllocator<'a, M> {
    /// Zero the count table and seed the free list with every whole frame in
    /// `[start, end)`.
    ///
    /// `start` is rounded up to a frame boundary; a frame straddling `end` is
    /// left out. Seeded frames are poisoned like released ones and end up
    /// with count zero.
    ///
    /// # Errors
    /// - [`FrameError::TableMismatch`] if the two tables differ in length or
    ///   exceed the linkable size.
    /// - [`FrameError::EmptyRange`] if no whole frame fits.
    /// - [`FrameError::TableTooSmall`] if the tables do not reach the last
    ///   frame number of the range.
    pub fn new(
        tables: FrameTables<'a>,
        memory: M,
        start: PhysAddr,
        end: PhysAddr,
    ) -> Result<Self, FrameError> {
        let FrameTables { counts, links } = tables;
        if counts.len() != links.len() || links.len() > MAX_FRAMES {
            return Err(FrameError::TableMismatch {
                counts: counts.len(),
                links: links.len(),
            });
        }

        let base = start.align_up();
        let span = end.as_u64().saturating_sub(base.as_u64());
        let frames = span / FRAME_SIZE;
        if frames == 0 {
            return Err(FrameError::EmptyRange { start, end });
        }
        let limit = base + frames * FRAME_SIZE;

        let needed = limit.frame_number().index();
        if needed > counts.len() {
            return Err(FrameError::TableTooSmall {
                needed,
                available: counts.len(),
            });
        }
        debug!("frame range {base}..{limit} ({frames} frames, table of {})", counts.len());

        let first = base.frame_number().index();
        let allocator = Self {
            refs: FrameRefTable::new(counts),
            free: SpinLock::new("frames.free", FreeList::new(links)),
            memory,
            range: base..limit,
            managed: needed - first,
        };
        allocator.seed(first..needed)?;

        info!(
            "frame allocator ready: {} frames in [{base}, {limit})",
            allocator.managed
        );
        Ok(allocator)
    }

    /// Range initializer: put unowned frames on the free list.
    fn seed(&self, frames: Range<usize>) -> Result<(), FrameError> {
        let mut free = self.free.lock();
        for n in frames {
            let frame = FrameNumber::new(n);
            self.poison(frame.start_address(), FREE_POISON);
            free.push(frame)?;
        }
        Ok(())
    }

    /// Frame aligned span of managed memory.
    #[must_use]
    pub fn range(&self) -> Range<PhysAddr> {
        self.range.clone()
    }

    /// Number of frames seeded at boot.
    #[must_use]
    pub const fn managed_frames(&self) -> usize {
        self.managed
    }

    /// Number of frames on the free list right now.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.free.lock().len()
    }

    #[must_use]
    pub fn stats(&self) -> FrameStats {
        let free = self.free_frames();
        FrameStats {
            total: self.managed,
            free,
            allocated: self.managed - free,
        }
    }

    /// Whether `pa` is the start of a managed frame.
    #[must_use]
    pub fn contains(&self, pa: PhysAddr) -> bool {
        self.frame_of(pa).is_ok()
    }

    /// Take a frame off the free list. Its count is 1 afterwards.
    ///
    /// # Errors
    /// [`OutOfMemory`] when the free list is empty; nothing is modified then.
    pub fn allocate_frame(&self) -> Result<PhysAddr, OutOfMemory> {
        let frame = match self.take() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!("out of physical frames ({} managed)", self.managed);
                return Err(OutOfMemory);
            }
            Err(e) => halt("allocate_frame", e),
        };
        let pa = frame.start_address();
        self.poison(pa, ALLOC_POISON);
        trace!("allocate {frame}");
        Ok(pa)
    }

    /// Like [`allocate_frame`](Self::allocate_frame), with the payload zeroed.
    ///
    /// # Errors
    /// [`OutOfMemory`] when the free list is empty.
    pub fn allocate_zeroed_frame(&self) -> Result<PhysAddr, OutOfMemory> {
        let pa = self.allocate_frame()?;
        self.memory.fill(pa, 0);
        Ok(pa)
    }

    fn take(&self) -> Result<Option<FrameNumber>, FrameError> {
        let mut free = self.free.lock();
        let Some(frame) = free.pop() else {
            return Ok(None);
        };
        self.refs.claim(frame)?;
        Ok(Some(frame))
    }

    /// Add an owner to an allocated frame. Returns the new count.
    ///
    /// Halts the kernel if `pa` is not an allocated frame.
    pub fn share_frame(&self, pa: PhysAddr) -> u32 {
        self.try_share_frame(pa)
            .unwrap_or_else(|e| halt("share_frame", e))
    }

    /// # Errors
    /// [`FrameError::InvalidFrame`] for an address outside the managed frames,
    /// [`FrameError::NotAllocated`] if the frame has no owner.
    pub fn try_share_frame(&self, pa: PhysAddr) -> Result<u32, FrameError> {
        let frame = self.frame_of(pa)?;
        let count = self.refs.share(frame)?;
        trace!("share {frame}: {count} owners");
        Ok(count)
    }

    /// Drop one owner; the last owner returns the frame to the pool.
    ///
    /// Halts the kernel on a double free or an invalid address.
    pub fn release_frame(&self, pa: PhysAddr) -> Release {
        self.try_release_frame(pa)
            .unwrap_or_else(|e| halt("release_frame", e))
    }

    /// # Errors
    /// [`FrameError::InvalidFrame`] for an address outside the managed frames,
    /// [`FrameError::DoubleFree`] if the frame has no owner left.
    pub fn try_release_frame(&self, pa: PhysAddr) -> Result<Release, FrameError> {
        let frame = self.frame_of(pa)?;

        let mut free = self.free.lock();
        let remaining = self
            .refs
            .decrement(frame)
            .map_err(|_| FrameError::DoubleFree { frame })?;

        if remaining > 0 {
            trace!("release {frame}: {remaining} owners left");
            return Ok(Release::StillShared(remaining));
        }

        self.poison(pa, FREE_POISON);
        free.push(frame)?;
        trace!("release {frame}: freed");
        Ok(Release::Freed)
    }

    /// Current owner count of a managed frame.
    ///
    /// Halts the kernel if `pa` is not a managed frame.
    #[must_use]
    pub fn reference_count(&self, pa: PhysAddr) -> u32 {
        self.try_reference_count(pa)
            .unwrap_or_else(|e| halt("reference_count", e))
    }

    /// # Errors
    /// [`FrameError::InvalidFrame`] for an address outside the managed frames.
    pub fn try_reference_count(&self, pa: PhysAddr) -> Result<u32, FrameError> {
        Ok(self.refs.get(self.frame_of(pa)?))
    }

    /// Whether a write to the frame needs a private copy first.
    #[must_use]
    pub fn is_shared(&self, pa: PhysAddr) -> bool {
        self.reference_count(pa) >= 2
    }

    /// Check that every managed frame is on the free list exactly when its
    /// count is zero.
    ///
    /// Holds the free-list lock for the whole walk, so it is meant for tests
    /// and debug shells, not hot paths.
    ///
    /// # Errors
    /// [`FrameError::FreeFrameReferenced`] for a listed frame with owners,
    /// [`FrameError::Leaked`] for an unowned frame missing from the list.
    pub fn verify(&self) -> Result<(), FrameError> {
        let free = self.free.lock();
        let first = self.range.start.frame_number().index();
        for n in first..first + self.managed {
            let frame = FrameNumber::new(n);
            let count = self.refs.get(frame);
            match (free.contains(frame), count) {
                (true, 0) | (false, 1..) => {}
                (true, count) => return Err(FrameError::FreeFrameReferenced { frame, count }),
                (false, 0) => return Err(FrameError::Leaked { frame }),
            }
        }
        Ok(())
    }

    fn frame_of(&self, pa: PhysAddr) -> Result<FrameNumber, FrameError> {
        let reason = if !pa.is_frame_aligned() {
            InvalidFrameReason::Unaligned
        } else if pa < self.range.start {
            InvalidFrameReason::BelowRange
        } else if pa >= self.range.end {
            InvalidFrameReason::AboveRange
        } else {
            return Ok(pa.frame_number());
        };
        Err(FrameError::InvalidFrame { addr: pa, reason })
    }

    #[inline]
    fn poison(&self, pa: PhysAddr, byte: u8) {
        if cfg!(feature = "poison") {
            self.memory.fill(pa, byte);
        }
    }
}

/// Frame source for page-table code.
pub trait FrameAlloc {
    /// Allocate one 4 KiB frame, or `None` when memory is exhausted.
    fn alloc_4k(&self) -> Option<PhysAddr>;

    /// Give up one reference to a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&self, frame: PhysAddr);
}

impl<M: FrameMemory> FrameAlloc for FrameAllocator<'_, M> {
    fn alloc_4k(&self) -> Option<PhysAddr> {
        self.allocate_zeroed_frame().ok()
    }

    fn free_4k(&self, frame: PhysAddr) {
        self.release_frame(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame memory that ignores writes.
    struct Discard;

    impl FrameMemory for Discard {
        fn fill(&self, _frame: PhysAddr, _byte: u8) {}
    }

    const BASE: u64 = 0x10_000;

    fn with_allocator<R>(frames: u64, f: impl FnOnce(&FrameAllocator<'_, Discard>) -> R) -> R {
        let mut storage = StaticFrameTables::<64>::new();
        let end = PhysAddr::new(BASE + frames * FRAME_SIZE);
        let alloc =
            FrameAllocator::new(storage.tables(), Discard, PhysAddr::new(BASE), end).unwrap();
        f(&alloc)
    }

    #[test]
    fn new_rejects_mismatched_tables() {
        let (mut counts, mut links) = ([0u32; 4], [0u32; 3]);
        let err = FrameAllocator::new(
            FrameTables::new(&mut counts, &mut links),
            Discard,
            PhysAddr::new(0),
            PhysAddr::new(FRAME_SIZE),
        )
        .err();
        assert_eq!(err, Some(FrameError::TableMismatch { counts: 4, links: 3 }));
    }

    #[test]
    fn new_rejects_table_not_reaching_the_end() {
        let mut storage = StaticFrameTables::<8>::new();
        let err = FrameAllocator::new(
            storage.tables(),
            Discard,
            PhysAddr::new(4 * FRAME_SIZE),
            PhysAddr::new(10 * FRAME_SIZE),
        )
        .err();
        assert_eq!(err, Some(FrameError::TableTooSmall { needed: 10, available: 8 }));
    }

    #[test]
    fn new_rejects_range_without_whole_frame() {
        let mut storage = StaticFrameTables::<8>::new();
        let start = PhysAddr::new(FRAME_SIZE + 1);
        let end = PhysAddr::new(3 * FRAME_SIZE - 1);
        let err = FrameAllocator::new(storage.tables(), Discard, start, end).err();
        assert_eq!(err, Some(FrameError::EmptyRange { start, end }));
    }

    #[test]
    fn end_before_start_is_empty() {
        let mut storage = StaticFrameTables::<8>::new();
        let start = PhysAddr::new(4 * FRAME_SIZE);
        let end = PhysAddr::new(FRAME_SIZE);
        assert!(matches!(
            FrameAllocator::new(storage.tables(), Discard, start, end),
            Err(FrameError::EmptyRange { .. })
        ));
    }

    #[test]
    fn range_is_rounded_to_whole_frames() {
        let mut storage = StaticFrameTables::<16>::new();
        let alloc = FrameAllocator::new(
            storage.tables(),
            Discard,
            PhysAddr::new(2 * FRAME_SIZE + 100),
            PhysAddr::new(9 * FRAME_SIZE + 5),
        )
        .unwrap();
        assert_eq!(
            alloc.range(),
            PhysAddr::new(3 * FRAME_SIZE)..PhysAddr::new(9 * FRAME_SIZE)
        );
        assert_eq!(alloc.managed_frames(), 6);
        assert_eq!(alloc.free_frames(), 6);
        assert_eq!(alloc.verify(), Ok(()));
    }

    #[test]
    fn address_validation() {
        with_allocator(4, |alloc| {
            let invalid = |addr: u64, reason| {
                Err::<u32, _>(FrameError::InvalidFrame {
                    addr: PhysAddr::new(addr),
                    reason,
                })
            };
            assert_eq!(
                alloc.try_reference_count(PhysAddr::new(BASE + 8)),
                invalid(BASE + 8, InvalidFrameReason::Unaligned)
            );
            assert_eq!(
                alloc.try_reference_count(PhysAddr::new(BASE - FRAME_SIZE)),
                invalid(BASE - FRAME_SIZE, InvalidFrameReason::BelowRange)
            );
            let top = BASE + 4 * FRAME_SIZE;
            assert_eq!(
                alloc.try_reference_count(PhysAddr::new(top)),
                invalid(top, InvalidFrameReason::AboveRange)
            );
            assert!(alloc.contains(PhysAddr::new(top - FRAME_SIZE)));
            assert!(!alloc.contains(PhysAddr::new(top)));
        });
    }

    #[test]
    fn allocation_failure_leaves_tables_untouched() {
        with_allocator(1, |alloc| {
            let pa = alloc.allocate_frame().unwrap();
            assert_eq!(alloc.allocate_frame(), Err(OutOfMemory));
            assert_eq!(alloc.reference_count(pa), 1);
            assert_eq!(alloc.free_frames(), 0);
            assert_eq!(alloc.verify(), Ok(()));
        });
    }

    #[test]
    fn release_only_frees_on_last_owner() {
        with_allocator(2, |alloc| {
            let pa = alloc.allocate_frame().unwrap();
            assert_eq!(alloc.share_frame(pa), 2);
            assert!(alloc.is_shared(pa));

            assert_eq!(alloc.release_frame(pa), Release::StillShared(1));
            assert!(!alloc.is_shared(pa));
            assert_eq!(alloc.free_frames(), 1);

            assert_eq!(alloc.release_frame(pa), Release::Freed);
            assert_eq!(alloc.free_frames(), 2);
            assert_eq!(alloc.reference_count(pa), 0);
        });
    }

    #[test]
    fn allocation_reuses_last_released_frame() {
        with_allocator(4, |alloc| {
            let a = alloc.allocate_frame().unwrap();
            let b = alloc.allocate_frame().unwrap();
            assert_ne!(a, b);
            alloc.release_frame(a);
            assert_eq!(alloc.allocate_frame(), Ok(a));
        });
    }

    #[test]
    fn corrupted_free_frame_is_detected_on_allocation() {
        with_allocator(1, |alloc| {
            let frame = alloc.range().start.frame_number();
            alloc.refs.set(frame, 3);
            assert_eq!(
                alloc.verify(),
                Err(FrameError::FreeFrameReferenced { frame, count: 3 })
            );
            assert_eq!(
                alloc.take(),
                Err(FrameError::FreeFrameReferenced { frame, count: 3 })
            );
        });
    }

    #[test]
    fn leaked_frame_is_detected() {
        with_allocator(2, |alloc| {
            let pa = alloc.allocate_frame().unwrap();
            alloc.refs.set(pa.frame_number(), 0);
            assert_eq!(
                alloc.verify(),
                Err(FrameError::Leaked {
                    frame: pa.frame_number()
                })
            );
        });
    }

    #[test]
    fn stats_add_up() {
        with_allocator(5, |alloc| {
            let a = alloc.allocate_frame().unwrap();
            let _b = alloc.allocate_frame().unwrap();
            alloc.share_frame(a);
            assert_eq!(
                alloc.stats(),
                FrameStats {
                    total: 5,
                    free: 3,
                    allocated: 2
                }
            );
        });
    }

    #[test]
    fn frame_alloc_trait_round_trip() {
        with_allocator(1, |alloc| {
            let source: &dyn FrameAlloc = alloc;
            let pa = source.alloc_4k().unwrap();
            assert!(pa.is_frame_aligned());
            assert_eq!(source.alloc_4k(), None);
            source.free_4k(pa);
            assert_eq!(alloc.free_frames(), 1);
        });
    }

    #[test]
    #[should_panic(expected = "share_frame: cannot share unallocated frame")]
    fn sharing_a_free_frame_halts() {
        with_allocator(1, |alloc| {
            alloc.share_frame(alloc.range().start);
        });
    }
}
