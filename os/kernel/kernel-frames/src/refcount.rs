//! Per-frame reference counts.
//!
//! One `u32` per frame number, guarded by its own lock. The lock is held for
//! exactly one entry update; it is never held across a free-list change.
//!
//! | count | meaning                                              |
//! |-------|------------------------------------------------------|
//! | 0     | untracked or on the free list                        |
//! | 1     | single owner, may be written in place                |
//! | ≥ 2   | shared, the writer must take a private copy first    |

use crate::addr::FrameNumber;
use crate::error::FrameError;
use kernel_sync::SpinLock;

pub struct FrameRefTable<'a> {
    counts: SpinLock<&'a mut [u32]>,
}

impl<'a> FrameRefTable<'a> {
    /// Take over `counts`, zeroing every entry.
    pub fn new(counts: &'a mut [u32]) -> Self {
        counts.fill(0);
        Self {
            counts: SpinLock::new("frames.refs", counts),
        }
    }

    /// Number of frames the table can describe.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, frame: FrameNumber) -> u32 {
        self.counts.lock()[frame.index()]
    }

    /// Overwrite the count, returning the previous value.
    pub fn set(&self, frame: FrameNumber, value: u32) -> u32 {
        core::mem::replace(&mut self.counts.lock()[frame.index()], value)
    }

    /// Add one owner. Returns the new count.
    pub fn increment(&self, frame: FrameNumber) -> u32 {
        self.with_entry(frame, |c| {
            *c += 1;
            *c
        })
    }

    /// Remove one owner. Returns the new count.
    ///
    /// # Errors
    /// [`FrameError::NegativeCount`] if the count is already zero; the entry
    /// is left untouched.
    pub fn decrement(&self, frame: FrameNumber) -> Result<u32, FrameError> {
        self.with_entry(frame, |c| match c.checked_sub(1) {
            Some(n) => {
                *c = n;
                Ok(n)
            }
            None => Err(FrameError::NegativeCount { frame }),
        })
    }

    /// Mark a frame just taken from the free list as owned (`0 → 1`).
    ///
    /// # Errors
    /// [`FrameError::FreeFrameReferenced`] if the frame still had owners.
    pub fn claim(&self, frame: FrameNumber) -> Result<(), FrameError> {
        self.with_entry(frame, |c| {
            if *c != 0 {
                return Err(FrameError::FreeFrameReferenced { frame, count: *c });
            }
            *c = 1;
            Ok(())
        })
    }

    /// Add an owner to an already owned frame. Returns the new count.
    ///
    /// # Errors
    /// [`FrameError::NotAllocated`] if nobody owns the frame.
    pub fn share(&self, frame: FrameNumber) -> Result<u32, FrameError> {
        self.with_entry(frame, |c| {
            if *c == 0 {
                return Err(FrameError::NotAllocated { frame });
            }
            *c += 1;
            Ok(*c)
        })
    }

    #[inline]
    fn with_entry<R>(&self, frame: FrameNumber, f: impl FnOnce(&mut u32) -> R) -> R {
        self.counts.with_lock(|counts| f(&mut counts[frame.index()]))
    }

    #[cfg(test)]
    fn is_locked(&self) -> bool {
        self.counts.is_locked()
    }
}
